use subnudge_browser::session::{list_available_browsers, list_targets, pick_page_target, wait_for_cdp_ready};
use subnudge_core::{Config, Paths};

/// Run full environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 subnudge doctor");
    println!("==================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    let config_path = paths.config_file();
    if config_path.exists() {
        print_ok("Config file exists", &config_path.display().to_string());
        ok_count += 1;
    } else {
        print_warn("Config file not found", "Using defaults; run `subnudge onboard` to write one");
        warn_count += 1;
    }

    let config = match Config::load_or_default(&paths) {
        Ok(c) => c,
        Err(e) => {
            print_err("Config file unreadable", &e.to_string());
            err_count += 1;
            Config::default()
        }
    };
    match config.validate() {
        Ok(()) => {
            print_ok("Config valid", "");
            ok_count += 1;
        }
        Err(e) => {
            print_err("Config invalid", &e.to_string());
            err_count += 1;
        }
    }
    println!("  Threshold: {}x", config.nudge.speed_threshold);
    println!();

    // --- 2. Browsers ---
    println!("🖥️  Browsers");
    let browsers = list_available_browsers();
    if browsers.is_empty() {
        print_warn("No Chrome or Edge found", "Needed only for `subnudge run --launch`");
        warn_count += 1;
    }
    for (engine, path) in &browsers {
        print_ok(engine.name(), path);
        ok_count += 1;
    }
    println!();

    // --- 3. DevTools endpoint ---
    println!("🌐 DevTools endpoint");
    let host = &config.browser.debug_host;
    let port = config.browser.debug_port;
    match wait_for_cdp_ready(host, port, 1).await {
        Ok(_) => {
            print_ok("Endpoint reachable", &format!("{}:{}", host, port));
            ok_count += 1;

            let patterns = config.browser.patterns().unwrap_or_default();
            match list_targets(host, port).await {
                Ok(targets) => match pick_page_target(&targets, &patterns) {
                    Some(t) => {
                        print_ok("Matching page open", &t.url);
                        ok_count += 1;
                    }
                    None => {
                        print_warn("No matching page open", "Open a video; `run` waits for one");
                        warn_count += 1;
                    }
                },
                Err(e) => {
                    print_err("Could not list pages", &e);
                    err_count += 1;
                }
            }
        }
        Err(_) => {
            print_warn(
                "Endpoint not reachable",
                &format!("Start the browser with --remote-debugging-port={}", port),
            );
            warn_count += 1;
        }
    }
    println!();

    // --- Summary ---
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "  ✅ {} passed  ⚠️  {} warnings  ❌ {} errors",
        ok_count, warn_count, err_count
    );
    println!();

    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {}: {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {}: {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {}: {}", label, hint);
    }
}
