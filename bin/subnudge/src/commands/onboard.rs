use std::io::{self, Write};
use subnudge_core::{Config, Paths};

pub async fn run(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();

    if paths.config_file().exists() && !force {
        print!("Config already exists. Overwrite? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    paths.ensure_dirs()?;
    let config = Config::default();
    config.save(&paths.config_file())?;
    println!("✓ Created config: {}", paths.config_file().display());

    println!();
    println!("Next steps:");
    println!(
        "  1. Start Chrome with --remote-debugging-port={}",
        config.browser.debug_port
    );
    println!("  2. Open a video and run `subnudge run`");
    println!("     (or `subnudge run --launch` to start a dedicated browser)");
    println!("  3. Tune nudge.speedThreshold with `subnudge config set`");

    Ok(())
}
