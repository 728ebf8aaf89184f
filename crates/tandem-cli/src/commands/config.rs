use tandem_core::util::is_http_url;

use crate::cli::ConfigCommands;
use crate::config_profiles::{normalize_text_option, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            backend_url,
            anon_key,
            access_token,
            storage_bucket,
            actor_id,
            realtime_topic,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            CliProfile {
                backend_url,
                anon_key,
                access_token,
                storage_bucket,
                actor_id,
                realtime_topic,
            },
            no_activate,
        ),
        ConfigCommands::Show { profile } => run_config_show(profile.as_deref().or(global_profile)),
    }
}

/// Merge explicit values over the stored profile and save it.
pub fn run_config_init(
    profile_name: Option<&str>,
    updates: CliProfile,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile_name);

    let profile = config.profile_mut_or_default(&profile_name);
    merge_profile(profile, updates);
    validate_profile(profile)?;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save()?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let missing_fields = config
        .profile(&profile_name)
        .map(CliProfile::missing_fields)
        .unwrap_or_default();
    if missing_fields.is_empty() {
        println!("Profile '{profile_name}' is ready. Run `tandem sync` to sync.");
    } else {
        println!(
            "Profile '{}' is missing: {}",
            profile_name,
            missing_fields.join(", ")
        );
    }

    Ok(())
}

pub fn merge_profile(profile: &mut CliProfile, updates: CliProfile) {
    if let Some(value) = normalize_text_option(updates.backend_url) {
        profile.backend_url = Some(value.trim_end_matches('/').to_string());
    }
    if let Some(value) = normalize_text_option(updates.anon_key) {
        profile.anon_key = Some(value);
    }
    if let Some(value) = normalize_text_option(updates.access_token) {
        profile.access_token = Some(value);
    }
    if let Some(value) = normalize_text_option(updates.storage_bucket) {
        profile.storage_bucket = Some(value);
    }
    if let Some(value) = normalize_text_option(updates.actor_id) {
        profile.actor_id = Some(value);
    }
    if let Some(value) = normalize_text_option(updates.realtime_topic) {
        profile.realtime_topic = Some(value);
    }
}

pub fn validate_profile(profile: &CliProfile) -> Result<(), CliError> {
    if let Some(url) = profile.backend_url.as_deref() {
        if !is_http_url(url) {
            return Err(CliError::Config(
                "backend_url must include http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

fn run_config_show(profile_name: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile_name);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured.");
        return Ok(());
    };

    println!("profile:        {profile_name}");
    for line in describe_profile(profile) {
        println!("{line}");
    }
    Ok(())
}

pub fn describe_profile(profile: &CliProfile) -> Vec<String> {
    let show = |value: Option<&str>| value.unwrap_or("(unset)").to_string();
    let redact = |value: Option<&str>| value.map_or("(unset)", |_| "[REDACTED]").to_string();
    vec![
        format!("backend_url:    {}", show(profile.backend_url.as_deref())),
        format!("anon_key:       {}", redact(profile.anon_key.as_deref())),
        format!("access_token:   {}", redact(profile.access_token.as_deref())),
        format!("storage_bucket: {}", show(profile.storage_bucket.as_deref())),
        format!("actor_id:       {}", show(profile.actor_id.as_deref())),
        format!("realtime_topic: {}", show(profile.realtime_topic.as_deref())),
    ]
}
