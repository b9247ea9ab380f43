use std::{
    fs::{self, File},
    path::Path,
    time::{Duration, SystemTime},
};

use anyhow::Result;

use qiniu_autossl_lib::{
    config::AppConfig,
    context::{ContextLoader, ServiceContext},
};

use super::test_utils::Harness;

fn config_toml(pass_interval_secs: u64) -> String {
    format!(
        r#"
        [qiniu]
        access_key = "ak"
        secret_key = "sk"

        [acme]
        email = "ops@example.com"

        [dns]
        provider = "cloudflare"
        api_token = "token"

        [schedule]
        pass_interval_secs = {pass_interval_secs}
        "#
    )
}

/// Rewrites the file and pushes its mtime forward so the change is visible
/// even on filesystems with coarse timestamps.
fn rewrite(path: &Path, content: &str, bump: u64) -> Result<()> {
    fs::write(path, content)?;
    let file = File::options().write(true).open(path)?;
    file.set_modified(SystemTime::now() + Duration::from_secs(bump))?;
    Ok(())
}

fn fake_context(config: &AppConfig) -> anyhow::Result<ServiceContext> {
    let mut context = Harness::new(&[]).context;
    context.settings.pass_interval = config.pass_interval();
    context.settings.renewal = config.renewal_policy();
    Ok(context)
}

fn loader(path: &Path) -> Result<ContextLoader> {
    ContextLoader::with_builder(path, Box::new(fake_context))
}

#[test]
fn unchanged_file_keeps_the_current_context() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    fs::write(&path, config_toml(120))?;

    let mut loader = loader(&path)?;
    assert!(!loader.reload_if_changed());
    assert_eq!(loader.current().settings.pass_interval, Duration::from_secs(120));
    Ok(())
}

#[test]
fn edited_file_swaps_in_a_new_context() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    fs::write(&path, config_toml(120))?;

    let mut loader = loader(&path)?;
    let before = loader.current();

    rewrite(&path, &config_toml(600), 10)?;
    assert!(loader.reload_if_changed());

    // A pass holding the old context keeps seeing it.
    assert_eq!(before.settings.pass_interval, Duration::from_secs(120));
    assert_eq!(loader.current().settings.pass_interval, Duration::from_secs(600));
    Ok(())
}

#[test]
fn broken_file_leaves_previous_context_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    fs::write(&path, config_toml(120))?;

    let mut loader = loader(&path)?;

    rewrite(&path, "[qiniu\naccess_key = ", 10)?;
    assert!(!loader.reload_if_changed());
    assert_eq!(loader.current().settings.pass_interval, Duration::from_secs(120));

    // Not retried until the file changes again.
    assert!(!loader.reload_if_changed());

    rewrite(&path, &config_toml(45), 20)?;
    assert!(loader.reload_if_changed());
    assert_eq!(loader.current().settings.pass_interval, Duration::from_secs(45));
    Ok(())
}

#[test]
fn invalid_initial_config_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    fs::write(&path, config_toml(120).replace("ops@example.com", ""))?;

    assert!(loader(&path).is_err());
    Ok(())
}
