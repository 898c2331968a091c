fn main() {
    // Load .env file for relay and provisioning defaults
    load_env_config();

    // Linker scripts only apply to the device build
    if std::env::var_os("CARGO_FEATURE_ESP32S3").is_some() {
        linker_be_nice();
        // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }
}

/// Load environment configuration from .env file
/// Environment variables take priority over .env file values
fn load_env_config() {
    use std::env;
    use std::path::Path;

    println!("cargo:rerun-if-changed=.env");
    for key in ["AI_BASE_URL", "DEFAULT_WIFI_SSID", "DEFAULT_WIFI_PASSWORD"] {
        println!("cargo:rerun-if-env-changed={}", key);
    }

    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    // Empty values are valid and mean "not configured"
    let read = |key: &str| env::var(key).unwrap_or_default().trim().to_string();

    let base_url = read("AI_BASE_URL");
    let ssid = read("DEFAULT_WIFI_SSID");
    let password = read("DEFAULT_WIFI_PASSWORD");

    println!("cargo:rustc-env=AI_BASE_URL={}", base_url);
    println!("cargo:rustc-env=DEFAULT_WIFI_SSID={}", ssid);
    println!("cargo:rustc-env=DEFAULT_WIFI_PASSWORD={}", password);

    if ssid.len() > 32 || password.len() > 64 {
        println!("cargo:warning=DEFAULT_WIFI_SSID/PASSWORD exceed 32/64 bytes and will be ignored");
    }
    if base_url.is_empty() {
        println!("cargo:warning=AI_BASE_URL is empty - relay needs a stored API config");
    }
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "esp_wifi_preempt_enable"
                | "esp_wifi_preempt_yield_task"
                | "esp_wifi_preempt_task_create" => {
                    eprintln!();
                    eprintln!("💡 `esp-wifi` has no scheduler enabled. Make sure you have the `builtin-scheduler` feature enabled, or that you provide an external scheduler.");
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    match std::env::current_exe() {
        Ok(exe) => println!(
            "cargo:rustc-link-arg=--error-handling-script={}",
            exe.display()
        ),
        Err(e) => println!("cargo:warning=Cannot locate build script: {}", e),
    }
}
