use tandem_core::version::{VersionCheck, VersionGate};
use tandem_core::PostgrestRemote;

use crate::config_profiles::{resolve_backend, CliProfilesConfig};
use crate::error::CliError;

/// Platform key of this client in the backend's version table.
pub const CLI_PLATFORM: &str = "cli";

pub async fn run_version_check(as_json: bool, profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile);
    let backend = resolve_backend(config.profile(&profile_name))?;
    let remote = PostgrestRemote::new(backend)?;

    let gate = VersionGate::new(CLI_PLATFORM, env!("CARGO_PKG_VERSION"))?;
    let check = gate.check(&remote).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&check)?);
    } else {
        for line in format_version_check(&gate.client_version().to_string(), &check) {
            println!("{line}");
        }
    }

    if check.compatible {
        Ok(())
    } else {
        Err(CliError::Core(tandem_core::Error::UpdateRequired {
            client: gate.client_version().to_string(),
            min: check.min_version.to_string(),
        }))
    }
}

pub fn format_version_check(client: &str, check: &VersionCheck) -> Vec<String> {
    let mut lines = vec![
        format!("client:   {client}"),
        format!("minimum:  {}", check.min_version),
        format!("current:  {}", check.current_version),
    ];
    if check.force_update {
        lines.push("This build is no longer supported; update required.".to_string());
    } else if check.migration_required {
        lines.push("A newer major version is available; migration required to upgrade.".to_string());
    } else {
        lines.push("Up to date.".to_string());
    }
    lines
}
