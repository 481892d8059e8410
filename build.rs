#[cfg(feature = "completion")]
#[path = "src/cli.rs"]
mod cli;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    #[cfg(feature = "completion")]
    completion();
}

#[cfg(feature = "completion")]
fn completion() {
    use clap::CommandFactory;
    use clap_complete::Shell;

    println!("cargo:rerun-if-changed=src/cli.rs");
    let out_dir = std::path::PathBuf::from(std::env::var_os("OUT_DIR").unwrap()).join("completions");
    std::fs::create_dir_all(&out_dir).unwrap();
    let mut cmd = cli::Cli::command();
    for shell in [Shell::Bash, Shell::Fish, Shell::Zsh] {
        clap_complete::generate_to(shell, &mut cmd, "usb-reset", &out_dir)
            .expect("failed to generate completion");
    }
}
