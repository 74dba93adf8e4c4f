//! Static mapping from watched directories to library names.
//!
//! Built once from configuration and shared read-only with the engine
//! and the filesystem watcher.

use std::path::{Path, PathBuf};

use crate::config::{ConfigError, MatchMode, Settings};

/// A directory tree that belongs to a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedDirectory {
    pub path: PathBuf,
    pub library: String,
}

/// Immutable library/directory lookup.
#[derive(Debug, Clone)]
pub struct WatchRegistry {
    /// Distinct library names in configuration order.
    libraries: Vec<String>,
    directories: Vec<WatchedDirectory>,
    mode: MatchMode,
}

impl WatchRegistry {
    /// Build the registry from validated settings.
    pub fn load(settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let libraries = settings.libraries.keys().cloned().collect();
        let directories = settings
            .libraries
            .iter()
            .flat_map(|(library, dirs)| {
                dirs.iter().map(move |dir| WatchedDirectory {
                    path: dir.clone(),
                    library: library.clone(),
                })
            })
            .collect();

        Ok(Self {
            libraries,
            directories,
            mode: settings.batching.match_mode,
        })
    }

    /// Build directly from `(library, directories)` pairs.
    pub fn from_entries<I, L, D>(entries: I, mode: MatchMode) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (L, Vec<D>)>,
        L: Into<String>,
        D: Into<PathBuf>,
    {
        let mut settings = Settings::default();
        settings.batching.match_mode = mode;
        for (library, dirs) in entries {
            settings
                .libraries
                .insert(library.into(), dirs.into_iter().map(Into::into).collect());
        }
        Self::load(&settings)
    }

    /// The full set of library names.
    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }

    pub fn directories(&self) -> &[WatchedDirectory] {
        &self.directories
    }

    pub fn match_mode(&self) -> MatchMode {
        self.mode
    }

    /// Libraries whose watched directories match `path`.
    ///
    /// A library is yielded once per matching directory, so callers that
    /// need a set should dedupe.
    pub fn libraries_for<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a str> + 'a {
        self.directories
            .iter()
            .filter(move |dir| dir_matches(self.mode, &dir.path, path))
            .map(|dir| dir.library.as_str())
    }
}

fn dir_matches(mode: MatchMode, watched: &Path, path: &Path) -> bool {
    match mode {
        // Component-wise, so `/movies` is an ancestor of `/movies/x` but not `/movies2/x`
        MatchMode::Segment => path.starts_with(watched),
        MatchMode::Substring => path
            .to_string_lossy()
            .contains(watched.to_string_lossy().as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(mode: MatchMode) -> WatchRegistry {
        WatchRegistry::from_entries(
            vec![
                ("movies", vec!["/movies", "/mnt/extra/movies"]),
                ("shows", vec!["/shows"]),
            ],
            mode,
        )
        .unwrap()
    }

    #[test]
    fn test_registry_basic() {
        let registry = registry(MatchMode::Segment);

        assert_eq!(registry.libraries(), &["movies", "shows"]);
        assert_eq!(registry.match_mode(), MatchMode::Segment);
        assert_eq!(registry.directories().len(), 3);
        assert_eq!(registry.directories()[1].library, "movies");
        assert_eq!(
            registry.directories()[1].path,
            PathBuf::from("/mnt/extra/movies")
        );
    }

    #[test]
    fn test_segment_match_descendant() {
        let registry = registry(MatchMode::Segment);
        let libs: Vec<&str> = registry
            .libraries_for(Path::new("/movies/Heat (1995)/heat.mkv"))
            .collect();
        assert_eq!(libs, vec!["movies"]);
    }

    #[test]
    fn test_segment_match_root_itself() {
        let registry = registry(MatchMode::Segment);
        let libs: Vec<&str> = registry.libraries_for(Path::new("/shows")).collect();
        assert_eq!(libs, vec!["shows"]);
    }

    #[test]
    fn test_segment_match_rejects_sibling_prefix() {
        let registry = registry(MatchMode::Segment);
        assert_eq!(registry.libraries_for(Path::new("/movies2/x")).count(), 0);
    }

    #[test]
    fn test_substring_match_accepts_sibling_prefix() {
        let registry = registry(MatchMode::Substring);
        let libs: Vec<&str> = registry.libraries_for(Path::new("/movies2/x")).collect();
        assert_eq!(libs, vec!["movies"]);
    }

    #[test]
    fn test_substring_match_anywhere_in_path() {
        let registry = registry(MatchMode::Substring);
        let libs: Vec<&str> = registry
            .libraries_for(Path::new("/backup/shows/s01e01.mkv"))
            .collect();
        assert_eq!(libs, vec!["shows"]);
    }

    #[test]
    fn test_overlapping_directories_match_multiple_libraries() {
        let registry = WatchRegistry::from_entries(
            vec![("media", vec!["/srv/media"]), ("movies", vec!["/srv/media/movies"])],
            MatchMode::Segment,
        )
        .unwrap();

        let libs: Vec<&str> = registry
            .libraries_for(Path::new("/srv/media/movies/a.mkv"))
            .collect();
        assert_eq!(libs, vec!["media", "movies"]);
    }

    #[test]
    fn test_empty_library_is_config_error() {
        let result = WatchRegistry::from_entries(
            vec![("movies", vec!["/movies"]), ("shows", Vec::<&str>::new())],
            MatchMode::Segment,
        );
        assert!(matches!(result, Err(ConfigError::EmptyLibrary { .. })));
    }
}
