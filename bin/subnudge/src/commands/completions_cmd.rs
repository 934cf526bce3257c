use clap_complete::{generate, Shell};

/// Generate shell completion scripts for `cmd`.
pub async fn run(shell: &str, mut cmd: clap::Command) -> anyhow::Result<()> {
    let shell = match shell.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" | "ps" => Shell::PowerShell,
        "elvish" => Shell::Elvish,
        _ => {
            anyhow::bail!(
                "Unsupported shell: {}. Options: bash, zsh, fish, powershell, elvish",
                shell
            );
        }
    };

    generate(shell, &mut cmd, "subnudge", &mut std::io::stdout());

    eprintln!();
    eprintln!("# Usage:");
    match shell {
        Shell::Bash => {
            eprintln!("#   subnudge completions bash > ~/.local/share/bash-completion/completions/subnudge");
            eprintln!("#   or: eval \"$(subnudge completions bash)\"");
        }
        Shell::Zsh => {
            eprintln!("#   subnudge completions zsh > ~/.zfunc/_subnudge");
            eprintln!("#   Make sure fpath includes ~/.zfunc and run compinit");
        }
        Shell::Fish => {
            eprintln!("#   subnudge completions fish > ~/.config/fish/completions/subnudge.fish");
        }
        _ => {}
    }

    Ok(())
}
