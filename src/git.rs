//! Repository origin lookup.
//!
//! A tracked project is labelled with the `owner/name` of its `origin`
//! remote, read straight from the repository's config file.

use crate::error::OriginError;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Tail of a remote URL: `:owner/name.git`, `/owner/name`, `/owner/name.git/`.
static ORIGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:/|:)([\w.-]+/[\w.-]+?)(?:\.git)?/?$").expect("origin pattern is valid")
});

/// Read `remote.origin.url` from a git config file and reduce it to `owner/name`.
pub fn resolve_origin(config_file: &Path) -> Result<String, OriginError> {
    let config = git2::Config::open(config_file)?;
    let url = match config.get_string("remote.origin.url") {
        Ok(url) => url,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Err(OriginError::NoOrigin),
        Err(e) => return Err(e.into()),
    };
    origin_from_url(&url).ok_or(OriginError::NoOrigin)
}

/// Origin of the repository rooted at (or containing) `root`.
pub fn origin_for_project(root: &Path) -> Result<String, OriginError> {
    let repo = git2::Repository::open(root)?;
    resolve_origin(&repo.path().join("config"))
}

fn origin_from_url(url: &str) -> Option<String> {
    ORIGIN_RE
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIT_CONFIG: &str = r#"
[core]
	repositoryformatversion = 0
	filemode = true
	bare = false
	logallrefupdates = true
[remote "origin"]
	url = git@gitlab.com:diamondburned/meistercli.git
	fetch = +refs/heads/*:refs/remotes/origin/*
[branch "master"]
	remote = origin
	merge = refs/heads/master
"#;

    #[test]
    fn resolves_ssh_remote_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, GIT_CONFIG).unwrap();

        assert_eq!(resolve_origin(&path).unwrap(), "diamondburned/meistercli");
    }

    #[test]
    fn missing_remote_is_no_origin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "[core]\n\tbare = false\n").unwrap();

        assert!(matches!(resolve_origin(&path), Err(OriginError::NoOrigin)));
    }

    #[test]
    fn url_forms() {
        let cases = [
            ("git@github.com:owner/name.git", Some("owner/name")),
            ("https://github.com/owner/name.git", Some("owner/name")),
            ("https://github.com/owner/name", Some("owner/name")),
            ("https://github.com/owner/name/", Some("owner/name")),
            ("ssh://git@host:22/some-org/my.repo.git", Some("some-org/my.repo")),
            ("not a url", None),
        ];
        for (url, expected) in cases {
            assert_eq!(origin_from_url(url).as_deref(), expected, "{url}");
        }
    }

    #[test]
    fn origin_for_initialised_repository() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://gitlab.com/owner/tracked.git")
            .unwrap();

        assert_eq!(origin_for_project(dir.path()).unwrap(), "owner/tracked");
    }

    #[test]
    fn origin_outside_repository_is_git_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            origin_for_project(dir.path()),
            Err(OriginError::Git(_))
        ));
    }
}
