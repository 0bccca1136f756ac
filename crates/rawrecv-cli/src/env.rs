use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Name of the dotenv file for `env`: `.env`, or `.env.{ENV}` when given.
pub fn dotenv_file_name(env: Option<&str>) -> String {
    match env {
        Some(env) => format!(".env.{}", env),
        None => ".env".to_string(),
    }
}

/// Find the dotenv file in `start` or any parent directory.
pub fn find_in_ancestors(start: &Path, file_name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(file_name))
        .find(|path| path.is_file())
}

/// Load the dotenv file from the current directory or any parent directory.
///
/// A missing `.env` is fine; a missing `.env.{ENV}` that was asked for by
/// name is an error.
pub fn load_dotenv_from_ancestors(env: Option<&str>) -> Result<Option<PathBuf>> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let file_name = dotenv_file_name(env);

    let Some(path) = find_in_ancestors(&cwd, &file_name) else {
        if env.is_some() {
            anyhow::bail!(
                "No {} file found.\n\nSearched from {} to filesystem root.",
                file_name,
                cwd.display()
            );
        }
        return Ok(None);
    };

    dotenvy::from_path(&path)
        .with_context(|| format!("Failed to load {} from {}", file_name, path.display()))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_dotenv_file_name() {
        assert_eq!(dotenv_file_name(None), ".env");
        assert_eq!(dotenv_file_name(Some("staging")), ".env.staging");
    }

    #[test]
    fn test_find_in_grandparent_directory() {
        let root = TempDir::new().unwrap();
        let child = root.path().join("parent").join("child");
        fs::create_dir_all(&child).unwrap();
        fs::write(root.path().join(".env"), "A=1").unwrap();

        assert_eq!(
            find_in_ancestors(&child, ".env"),
            Some(root.path().join(".env"))
        );
        assert_eq!(find_in_ancestors(&child, ".env.prod"), None);
    }

    #[test]
    fn test_nearest_file_wins() {
        let root = TempDir::new().unwrap();
        let child = root.path().join("child");
        fs::create_dir(&child).unwrap();
        fs::write(root.path().join(".env"), "A=1").unwrap();
        fs::write(child.join(".env"), "A=2").unwrap();

        assert_eq!(find_in_ancestors(&child, ".env"), Some(child.join(".env")));
    }

    #[test]
    #[serial]
    fn test_load_named_env_from_parent_directory() {
        let parent_dir = TempDir::new().unwrap();
        let child_dir = parent_dir.path().join("subdir");
        fs::create_dir(&child_dir).unwrap();
        fs::write(
            parent_dir.path().join(".env.rawrecvtest"),
            "RAWRECV_TEST_VAR_PARENT=world",
        )
        .unwrap();

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&child_dir).unwrap();
        std::env::remove_var("RAWRECV_TEST_VAR_PARENT");

        let result = load_dotenv_from_ancestors(Some("rawrecvtest"));
        let value = std::env::var("RAWRECV_TEST_VAR_PARENT");

        std::env::set_current_dir(original_dir).unwrap();
        std::env::remove_var("RAWRECV_TEST_VAR_PARENT");

        assert!(result.unwrap().is_some(), "Should find .env.rawrecvtest in parent directory");
        assert_eq!(value.unwrap(), "world");
    }

    #[test]
    #[serial]
    fn test_missing_named_env_is_an_error() {
        let dir = TempDir::new().unwrap();

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let result = load_dotenv_from_ancestors(Some("rawrecv-does-not-exist"));

        std::env::set_current_dir(original_dir).unwrap();

        let err = result.unwrap_err().to_string();
        assert!(err.contains(".env.rawrecv-does-not-exist"));
    }
}
