//! Safe Zone resolution
//!
//! The Safe Zone is the set of canonical directories (the working directory
//! plus configured extras) inside which file mutations may be auto-accepted.
//! Membership is decided on real paths, so a symlink that lives inside the
//! zone but points outside it is treated as outside.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Maximum number of symlinks followed while resolving one path
const MAX_SYMLINK_DEPTH: usize = 40;

/// Canonical directories within which file mutations may be auto-accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeZone {
    /// Resolved working directory (always `dirs[0]`)
    workdir: PathBuf,
    /// All resolved zone directories
    dirs: Vec<PathBuf>,
}

impl SafeZone {
    /// Build the zone from a working directory and extra directories
    ///
    /// Extra directories may be absolute, `~/`-relative, or relative to the
    /// working directory. Entries that do not resolve to an existing directory
    /// are dropped with a warning. The working directory is always present.
    pub fn build<S: AsRef<str>>(workdir: &Path, additional_dirs: &[S]) -> Self {
        let absolute = absolutize(workdir);
        let workdir = match fs::canonicalize(&absolute) {
            Ok(real) => real,
            Err(e) => {
                tracing::warn!(
                    "[SafeZone] Cannot resolve working directory {}: {} (using it unresolved)",
                    absolute.display(),
                    e
                );
                lexical_normalize(&absolute)
            }
        };

        let mut dirs = vec![workdir.clone()];
        for raw in additional_dirs {
            let raw = raw.as_ref();
            let candidate = expand_home(raw).unwrap_or_else(|| workdir.join(raw));
            match fs::canonicalize(&candidate) {
                Ok(real) if real.is_dir() => {
                    if !dirs.contains(&real) {
                        dirs.push(real);
                    }
                }
                Ok(real) => {
                    tracing::warn!(
                        "[SafeZone] Dropping additional directory {:?}: {} is not a directory",
                        raw,
                        real.display()
                    );
                }
                Err(e) => {
                    tracing::warn!("[SafeZone] Dropping additional directory {:?}: {}", raw, e);
                }
            }
        }

        Self { workdir, dirs }
    }

    /// Resolved working directory
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// All zone directories, working directory first
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Resolve a (possibly relative, possibly non-existent) path to its real location
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = expand_home(path).unwrap_or_else(|| self.workdir.join(path));
        resolve_real_path(&candidate)
    }

    /// Check whether a path resolves inside the zone
    ///
    /// An empty path names nothing and is never inside.
    pub fn contains(&self, path: &str) -> bool {
        if path.trim().is_empty() {
            return false;
        }
        let resolved = self.resolve(path);
        self.dirs.iter().any(|dir| resolved.starts_with(dir))
    }

    /// Spellings of `path` that rules may have been written against
    ///
    /// The path as given, its lexically normalized absolute form, its real
    /// location, and the workdir-relative form of each when inside it.
    pub fn aliases(&self, path: &str) -> Vec<String> {
        let absolute = expand_home(path).unwrap_or_else(|| self.workdir.join(path));
        let mut aliases = vec![path.to_string()];

        for form in [lexical_normalize(&absolute), resolve_real_path(&absolute)] {
            let relative = form
                .strip_prefix(&self.workdir)
                .ok()
                .filter(|rel| !rel.as_os_str().is_empty())
                .map(|rel| rel.to_string_lossy().into_owned());
            for alias in std::iter::once(form.to_string_lossy().into_owned()).chain(relative) {
                if !aliases.contains(&alias) {
                    aliases.push(alias);
                }
            }
        }
        aliases
    }
}

/// Build the Safe Zone for a working directory
pub fn build_safe_zone<S: AsRef<str>>(workdir: &Path, additional_dirs: &[S]) -> SafeZone {
    SafeZone::build(workdir, additional_dirs)
}

/// Check whether `path` resolves inside the zone
pub fn is_in_safe_zone(path: &str, zone: &SafeZone) -> bool {
    zone.contains(path)
}

/// Resolve an absolute path to its real location, best effort
///
/// Components are walked left to right. Every existing symlink met on the way
/// is replaced by its target, whether or not the rest of the path exists, and
/// `..` always pops a resolved directory. Never fails.
pub fn resolve_real_path(path: &Path) -> PathBuf {
    let mut pending: VecDeque<Step> = steps(path).into();
    let mut resolved = PathBuf::new();
    let mut followed = 0;

    while let Some(step) = pending.pop_front() {
        match step {
            Step::Root(root) => resolved.push(root),
            Step::Parent => {
                resolved.pop();
            }
            Step::Name(name) => {
                let next = resolved.join(&name);
                match read_symlink(&next) {
                    Some(target) if followed < MAX_SYMLINK_DEPTH => {
                        followed += 1;
                        for step in steps(&target).into_iter().rev() {
                            pending.push_front(step);
                        }
                    }
                    _ => resolved = next,
                }
            }
        }
    }
    resolved
}

/// One owned path component still to be resolved
enum Step {
    Root(OsString),
    Parent,
    Name(OsString),
}

fn steps(path: &Path) -> Vec<Step> {
    path.components()
        .filter_map(|component| match component {
            Component::Prefix(_) | Component::RootDir => {
                Some(Step::Root(component.as_os_str().to_os_string()))
            }
            Component::ParentDir => Some(Step::Parent),
            Component::Normal(name) => Some(Step::Name(name.to_os_string())),
            Component::CurDir => None,
        })
        .collect()
}

fn read_symlink(path: &Path) -> Option<PathBuf> {
    let metadata = fs::symlink_metadata(path).ok()?;
    if !metadata.file_type().is_symlink() {
        return None;
    }
    fs::read_link(path).ok()
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Expand `~` and `~/...`, and pass absolute paths through
fn expand_home(raw: &str) -> Option<PathBuf> {
    if raw == "~" || raw.starts_with("~/") {
        let home = std::env::var_os("HOME")?;
        let rest = raw.trim_start_matches('~').trim_start_matches('/');
        return Some(PathBuf::from(home).join(rest));
    }
    let path = Path::new(raw);
    path.is_absolute().then(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        workdir: PathBuf,
        outside: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let workdir = root.join("proj");
        let outside = root.join("outside");
        fs::create_dir_all(workdir.join("src")).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(workdir.join("src/lib.rs"), "").unwrap();
        fs::write(outside.join("secret.txt"), "").unwrap();
        Fixture {
            _tmp: tmp,
            root,
            workdir,
            outside,
        }
    }

    fn s(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_zone_always_contains_workdir() {
        let fx = fixture();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);
        assert_eq!(zone.dirs(), &[fx.workdir.clone()]);
        assert_eq!(zone.workdir(), fx.workdir.as_path());
    }

    #[test]
    fn test_missing_workdir_still_yields_zone() {
        let fx = fixture();
        let missing = fx.root.join("nope/../nope2");
        let zone = build_safe_zone::<&str>(&missing, &[]);
        assert_eq!(zone.dirs(), &[fx.root.join("nope2")]);
    }

    #[test]
    fn test_additional_dirs_resolved_and_invalid_dropped() {
        let fx = fixture();
        fs::create_dir_all(fx.root.join("shared")).unwrap();
        let zone = build_safe_zone(
            &fx.workdir,
            &[
                "../shared".to_string(),
                s(&fx.outside),
                "does-not-exist".to_string(),
                "src/lib.rs".to_string(),
                s(&fx.outside),
            ],
        );
        assert_eq!(
            zone.dirs(),
            &[fx.workdir.clone(), fx.root.join("shared"), fx.outside.clone()]
        );
    }

    #[test]
    fn test_existing_and_new_paths_inside() {
        let fx = fixture();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);
        assert!(is_in_safe_zone(&s(&fx.workdir.join("src/lib.rs")), &zone));
        assert!(is_in_safe_zone(&s(&fx.workdir.join("new/dir/file.rs")), &zone));
        assert!(is_in_safe_zone(&s(&fx.workdir), &zone));
        assert!(is_in_safe_zone("src/lib.rs", &zone));
        assert!(is_in_safe_zone("./a/../b.txt", &zone));
    }

    #[test]
    fn test_outside_paths_rejected() {
        let fx = fixture();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);
        assert!(!is_in_safe_zone(&s(&fx.outside.join("secret.txt")), &zone));
        assert!(!is_in_safe_zone("../outside/secret.txt", &zone));
        assert!(!is_in_safe_zone("/etc/passwd", &zone));
        assert!(!is_in_safe_zone("new/../../outside/x", &zone));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_outside() {
        let fx = fixture();
        fs::create_dir_all(fx.root.join("proj2")).unwrap();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);
        assert!(!is_in_safe_zone(&s(&fx.root.join("proj2/a.txt")), &zone));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let fx = fixture();
        std::os::unix::fs::symlink(&fx.outside, fx.workdir.join("escape")).unwrap();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);

        assert!(!is_in_safe_zone("escape/secret.txt", &zone));
        assert!(!is_in_safe_zone("escape/new-file.txt", &zone));
        assert!(!is_in_safe_zone(&s(&fx.workdir.join("escape")), &zone));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_after_parent_of_missing_dir_is_resolved() {
        let fx = fixture();
        std::os::unix::fs::symlink("../outside", fx.workdir.join("escape")).unwrap();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);

        let sneaky = fx.workdir.join("nonexistent/../escape/pwned.txt");
        assert_eq!(zone.resolve(&s(&sneaky)), fx.outside.join("pwned.txt"));
        assert!(!is_in_safe_zone(&s(&sneaky), &zone));
        assert!(!is_in_safe_zone("missing/deeper/../../escape/x", &zone));
        assert!(is_in_safe_zone("missing/../src/new.rs", &zone));
    }

    #[cfg(unix)]
    #[test]
    fn test_parent_of_symlink_is_the_target_parent() {
        let fx = fixture();
        let nested = fx.outside.join("nested");
        fs::create_dir_all(&nested).unwrap();
        std::os::unix::fs::symlink(&nested, fx.workdir.join("link")).unwrap();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);

        assert_eq!(zone.resolve("link/../x"), fx.outside.join("x"));
        assert!(!is_in_safe_zone("link/../x", &zone));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_terminates() {
        let fx = fixture();
        std::os::unix::fs::symlink(fx.workdir.join("b"), fx.workdir.join("a")).unwrap();
        std::os::unix::fs::symlink(fx.workdir.join("a"), fx.workdir.join("b")).unwrap();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);

        assert!(zone.resolve("a/file").starts_with(&fx.workdir));
    }

    #[test]
    fn test_empty_path_is_not_inside() {
        let fx = fixture();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);
        assert!(!is_in_safe_zone("", &zone));
        assert!(!is_in_safe_zone("   ", &zone));
    }

    #[test]
    fn test_aliases_normalize_and_relativize() {
        let fx = fixture();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);

        let aliases = zone.aliases("/tmp/../etc/passwd");
        assert!(aliases.contains(&"/tmp/../etc/passwd".to_string()));
        assert!(aliases.contains(&"/etc/passwd".to_string()));

        assert!(zone.aliases("//etc/shadow").contains(&"/etc/shadow".to_string()));

        let aliases = zone.aliases("./src/../src/lib.rs");
        assert!(aliases.contains(&"src/lib.rs".to_string()));
        assert!(aliases.contains(&s(&fx.workdir.join("src/lib.rs"))));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_escape_is_rejected() {
        let fx = fixture();
        std::os::unix::fs::symlink(
            fx.outside.join("not-yet.txt"),
            fx.workdir.join("dangling"),
        )
        .unwrap();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);

        assert!(!is_in_safe_zone("dangling", &zone));
        assert_eq!(zone.resolve("dangling"), fx.outside.join("not-yet.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_into_zone_is_accepted() {
        let fx = fixture();
        std::os::unix::fs::symlink(fx.workdir.join("src"), fx.outside.join("link")).unwrap();
        let zone = build_safe_zone::<&str>(&fx.workdir, &[]);

        assert!(is_in_safe_zone(&s(&fx.outside.join("link/lib.rs")), &zone));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_workdir_is_canonicalized() {
        let fx = fixture();
        let alias = fx.root.join("alias");
        std::os::unix::fs::symlink(&fx.workdir, &alias).unwrap();
        let zone = build_safe_zone::<&str>(&alias, &[]);

        assert_eq!(zone.workdir(), fx.workdir.as_path());
        assert!(is_in_safe_zone(&s(&alias.join("src/lib.rs")), &zone));
    }
}
