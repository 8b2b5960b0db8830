// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn blacklist_arg() -> Arg {
    Arg::new("blacklist")
        .long("blacklist")
        .value_name("PATH")
        .help("Blacklist file")
}

fn build_cli() -> Command {
    Command::new("archport")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Archport Contributors")
        .about("Dependency-ordered porting planner and sandboxed builder for Arch Linux")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .subcommand(
            Command::new("plan")
                .about("Compute a dependency-ordered build plan")
                .arg(
                    Arg::new("packages")
                        .num_args(0..)
                        .help("Build exactly these basenames or package names"),
                )
                .arg(flag("missing", "Only packages missing from the target"))
                .arg(
                    Arg::new("rebuild-repo")
                        .long("rebuild-repo")
                        .value_name("REPO")
                        .help("Rebuild every package of one repository (core, extra)"),
                )
                .arg(flag("use-latest", "Build the listed packages from their newest source revision"))
                .arg(
                    Arg::new("aur")
                        .long("aur")
                        .value_name("BASENAME")
                        .action(ArgAction::Append)
                        .help("Fetch these basenames from the AUR"),
                )
                .arg(flag("include-any", "Allow listing architecture-independent packages"))
                .arg(flag("preserve-order", "Build the listed packages in the order given"))
                .arg(flag("no-fetch", "Do not clone or update sources"))
                .arg(blacklist_arg())
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value("packages_to_build.json")
                        .help("Plan file to write"),
                ),
        )
        .subcommand(
            Command::new("build")
                .about("Build the packages of a plan")
                .arg(
                    Arg::new("plan")
                        .default_value("packages_to_build.json")
                        .help("Plan file to build"),
                )
                .arg(flag("dry-run", "Show what would be built without touching the build root"))
                .arg(flag("continue", "Continue after the last successfully built package"))
                .arg(flag("stop-on-failure", "Stop at the first failure and keep its sandbox"))
                .arg(flag("preserve", "Keep the sandbox of failed builds for inspection"))
                .arg(flag("no-cache", "Empty the package cache before each build"))
                .arg(flag("no-upload", "Build without uploading artifacts"))
                .arg(
                    Arg::new("retry-file")
                        .long("retry-file")
                        .default_value("failed_packages.json")
                        .help("Where failed packages are written"),
                )
                .arg(blacklist_arg()),
        )
        .subcommand(
            Command::new("bootstrap")
                .about("Rebuild the toolchain in two stages")
                .arg(flag("continue", "Continue after the last completed step"))
                .arg(flag("no-fetch", "Do not clone missing checkouts"))
                .arg(flag("no-upload", "Build without uploading artifacts"))
                .arg(flag("preserve", "Keep the sandbox of the failing step")),
        )
        .subcommand(
            Command::new("analyze").about("Report repository inconsistencies between the architectures"),
        )
        .subcommand(
            Command::new("dependents")
                .about("List basenames that depend on a package")
                .arg(Arg::new("package").required(true).help("Package name"))
                .arg(flag("target", "Query the target repositories instead of the reference")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("archport.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
