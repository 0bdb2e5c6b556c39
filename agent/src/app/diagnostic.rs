//! `--diagnostic`: one-shot checks of everything a cycle depends on

use colored::Colorize;

use crate::app::context::AgentContext;
use crate::deploy::compose::ComposeRuntime;
use crate::http::client::HttpClient;
use crate::http::device::BackendApi;
use crate::storage::layout::StorageLayout;
use crate::storage::versions::VersionStore;
use crate::utils::version_info;

fn pass(check: &str, detail: impl std::fmt::Display) {
    println!("  {} {:<18} {}", "✓".green(), check, detail);
}

fn fail(check: &str, detail: impl std::fmt::Display) {
    println!("  {} {:<18} {}", "✗".red(), check, detail);
}

fn skip(check: &str, detail: impl std::fmt::Display) {
    println!("  {} {:<18} {}", "-".yellow(), check, detail);
}

/// Run the diagnostic checks and print a report. Returns false if any check failed.
pub async fn run_diagnostic() -> bool {
    let version = version_info();
    println!(
        "{} {} ({}, built {})",
        "BeachVar Agent".bold(),
        version.version,
        version.git_hash,
        version.build_time
    );
    println!();

    let mut healthy = true;

    let context = match AgentContext::from_env() {
        Ok(context) => {
            pass("configuration", format!("backend {}", context.backend_url));
            context
        }
        Err(e) => {
            fail("configuration", e);
            skip("docker", "needs configuration");
            skip("backend", "needs configuration");
            skip("version record", "needs configuration");
            return false;
        }
    };

    let runtime = ComposeRuntime::new(&context.compose_file);
    match runtime.check().await {
        Ok(server_version) => pass(
            "docker",
            format!("server {}, compose file {}", server_version, context.compose_file.display()),
        ),
        Err(e) => {
            healthy = false;
            fail("docker", e);
        }
    }

    match HttpClient::new(&context.backend_url, context.device_token.clone()) {
        Ok(client) => match client.fetch_device_config().await {
            Ok(config) => pass(
                "backend",
                format!("reachable, {} update window(s)", config.update_windows.len()),
            ),
            Err(e) => {
                healthy = false;
                fail("backend", e);
            }
        },
        Err(e) => {
            healthy = false;
            fail("backend", e);
        }
    }

    let file = StorageLayout::new(&context.state_dir).versions_file();
    if file.exists().await {
        let store = VersionStore::open(file).await;
        let recorded: Vec<String> = store
            .load()
            .await
            .into_iter()
            .map(|(service, version)| {
                format!("{}={}", service, version.as_deref().unwrap_or("unknown"))
            })
            .collect();
        pass("version record", recorded.join(", "));
    } else {
        skip(
            "version record",
            format!("{} not written yet", file.path().display()),
        );
    }

    println!();
    if healthy {
        println!("{}", "All checks passed".green());
    } else {
        println!("{}", "Some checks failed".red());
    }
    healthy
}
