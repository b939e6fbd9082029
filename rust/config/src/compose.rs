//! Composition of a job configuration from a config directory.
//!
//! Layout of a config directory:
//!
//! ```text
//! config/simulation/
//!   default_simulation.toml      primary config
//!   planner/
//!     simple_planner.toml        option "simple_planner" of group "planner"
//!     ml_planner.toml
//!   simulation/
//!     closed_loop_nonreactive_agents.toml
//! ```
//!
//! A primary or option file selects group options through a `[defaults]`
//! table (`planner = "simple_planner"`). An option file is placed under its
//! group key unless it declares `_package_ = "_global_"`, in which case it is
//! merged into the root.

use std::path::{Path, PathBuf};

use toml::Value;

use crate::{
    error::ConfigError,
    interpolate,
    overrides::{Override, OverrideKind},
    tree::ConfigTree,
};

/// Table in a config file that selects group options.
pub const DEFAULTS_KEY: &str = "defaults";
/// Key in an option file that chooses where the option is placed.
pub const PACKAGE_KEY: &str = "_package_";
/// Package value that merges an option into the root of the tree.
pub const GLOBAL_PACKAGE: &str = "_global_";

const MAX_DEFAULTS_DEPTH: usize = 16;

/// One `group = "option"` entry of a defaults list.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    group: String,
    option: String,
}

/// Composes configurations from one config directory.
///
/// A `Composer` holds nothing but the directory; each call to
/// [`Composer::compose`] starts from the files on disk.
#[derive(Debug, Clone)]
pub struct Composer {
    config_dir: PathBuf,
}

impl Composer {
    #[must_use]
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Whether `key` names a config group (a directory of option files).
    #[must_use]
    pub fn is_group(&self, key: &str) -> bool {
        self.group_dir(key).is_dir()
    }

    /// Option names available in a group, sorted.
    #[must_use]
    pub fn group_options(&self, group: &str) -> Vec<String> {
        let mut options: Vec<String> = std::fs::read_dir(self.group_dir(group))
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(".toml").map(String::from)
            })
            .collect();
        options.sort();
        options
    }

    /// Compose `<config_dir>/<config_name>.toml` with `overrides`.
    ///
    /// The tree is built from the defaults (nested defaults first), the
    /// primary body and the groups added by overrides. Group overrides apply
    /// to every defaults list that selects their group, nested ones included.
    /// Value overrides are applied last, in order, and interpolations resolved.
    pub fn compose(
        &self,
        config_name: &str,
        overrides: &[Override],
    ) -> Result<ConfigTree, ConfigError> {
        let primary_path = self.config_dir.join(format!("{config_name}.toml"));
        if !primary_path.is_file() {
            return Err(ConfigError::NotFound {
                name: config_name.to_string(),
                dir: self.config_dir.clone(),
            });
        }

        let mut primary = ConfigTree::from_file(&primary_path)?;
        let defaults = take_defaults(&mut primary, &primary_path)?;

        let (group_overrides, value_overrides): (Vec<&Override>, Vec<&Override>) =
            overrides.iter().partition(|o| self.is_group_override(o));
        let mut edits = GroupEdits::new(group_overrides);

        let mut tree = ConfigTree::new();
        let mut placed = self.place_all(&mut tree, defaults, &mut edits, 0)?;
        tree.merge(&primary);
        let appended = edits.take_additions()?;
        placed += self.place_all(&mut tree, appended, &mut edits, 0)?;
        edits.finish()?;

        for o in value_overrides {
            o.apply_to(&mut tree)?;
        }

        let resolved = interpolate::resolve(&tree)?;
        tracing::debug!(
            "Composed {} with {} overrides ({} groups)",
            primary_path.display(),
            overrides.len(),
            placed
        );
        Ok(resolved)
    }

    fn group_dir(&self, group: &str) -> PathBuf {
        self.config_dir.join(group.replace('.', "/"))
    }

    fn is_group_override(&self, o: &Override) -> bool {
        let selects_option = o.value.as_ref().is_none_or(Value::is_str);
        selects_option && self.is_group(&o.key)
    }

    /// Apply group overrides to one defaults list and place its selections.
    ///
    /// Returns the number of selections placed, nested ones included.
    fn place_all(
        &self,
        tree: &mut ConfigTree,
        mut list: Vec<Selection>,
        edits: &mut GroupEdits<'_>,
        depth: usize,
    ) -> Result<usize, ConfigError> {
        if depth > MAX_DEFAULTS_DEPTH {
            return Err(ConfigError::DefaultsTooDeep(MAX_DEFAULTS_DEPTH));
        }
        edits.apply(&mut list)?;

        let mut placed = 0;
        for selection in &list {
            placed += 1 + self.place(tree, selection, edits, depth)?;
        }
        Ok(placed)
    }

    /// Load an option file and merge it into `tree`.
    ///
    /// Nested defaults of the option name root-level groups and are placed first.
    fn place(
        &self,
        tree: &mut ConfigTree,
        selection: &Selection,
        edits: &mut GroupEdits<'_>,
        depth: usize,
    ) -> Result<usize, ConfigError> {
        let path = self
            .group_dir(&selection.group)
            .join(format!("{}.toml", selection.option));
        if !path.is_file() {
            return Err(ConfigError::UnknownOption {
                group: selection.group.clone(),
                option: selection.option.clone(),
                available: self.group_options(&selection.group).join(", "),
            });
        }

        let mut body = ConfigTree::from_file(&path)?;
        let nested = take_defaults(&mut body, &path)?;
        let global = match body.remove(PACKAGE_KEY) {
            None => false,
            Some(Value::String(package)) => package == GLOBAL_PACKAGE,
            Some(_) => return Err(ConfigError::InvalidPackage(path)),
        };

        let placed = self.place_all(tree, nested, edits, depth + 1)?;

        if global {
            tree.merge(&body);
        } else {
            let mut section = ConfigTree::new();
            section.set(&selection.group, Value::Table(body.into_table()))?;
            tree.merge(&section);
        }
        tracing::trace!("Placed {}={}", selection.group, selection.option);
        Ok(placed)
    }
}

fn take_defaults(tree: &mut ConfigTree, origin: &Path) -> Result<Vec<Selection>, ConfigError> {
    match tree.remove(DEFAULTS_KEY) {
        None => Ok(Vec::new()),
        Some(Value::Table(table)) => table
            .into_iter()
            .map(|(group, option)| match option {
                Value::String(option) => Ok(Selection { group, option }),
                _ => Err(ConfigError::InvalidDefaults {
                    path: origin.to_path_buf(),
                    entry: group,
                }),
            })
            .collect(),
        Some(_) => Err(ConfigError::InvalidDefaults {
            path: origin.to_path_buf(),
            entry: DEFAULTS_KEY.to_string(),
        }),
    }
}

/// Group overrides of one composition, each with whether it matched yet.
struct GroupEdits<'a> {
    edits: Vec<(&'a Override, bool)>,
}

impl<'a> GroupEdits<'a> {
    fn new(overrides: Vec<&'a Override>) -> Self {
        Self {
            edits: overrides.into_iter().map(|o| (o, false)).collect(),
        }
    }

    /// Rewrite a defaults list with every override naming one of its groups.
    fn apply(&mut self, list: &mut Vec<Selection>) -> Result<(), ConfigError> {
        for (o, applied) in &mut self.edits {
            let Some(i) = list.iter().position(|s| s.group == o.key) else {
                continue;
            };
            match (o.kind, selected_option(o)) {
                // the selection this addition appended
                (OverrideKind::Add, _) if *applied => continue,
                (OverrideKind::Add, _) => {
                    return Err(ConfigError::GroupAlreadySelected(o.key.clone()));
                }
                (OverrideKind::Set | OverrideKind::ForceAdd, Some(option)) => {
                    list[i].option = option;
                }
                (OverrideKind::Delete, expected) => {
                    if let Some(expected) = expected
                        && expected != list[i].option
                    {
                        return Err(ConfigError::DeleteMismatch {
                            key: o.key.clone(),
                            expected,
                            found: list[i].option.clone(),
                        });
                    }
                    list.remove(i);
                }
                (_, None) => return Err(ConfigError::MissingValue(o.key.clone())),
            }
            *applied = true;
        }
        Ok(())
    }

    /// Selections of `+group=option` and `++group=option` no defaults list made.
    fn take_additions(&mut self) -> Result<Vec<Selection>, ConfigError> {
        let mut appended: Vec<Selection> = Vec::new();
        for (o, applied) in &mut self.edits {
            if *applied || !matches!(o.kind, OverrideKind::Add | OverrideKind::ForceAdd) {
                continue;
            }
            let option =
                selected_option(o).ok_or_else(|| ConfigError::MissingValue(o.key.clone()))?;
            match appended.iter_mut().find(|s| s.group == o.key) {
                Some(_) if o.kind == OverrideKind::Add => {
                    return Err(ConfigError::GroupAlreadySelected(o.key.clone()));
                }
                Some(selection) => selection.option = option,
                None => appended.push(Selection {
                    group: o.key.clone(),
                    option,
                }),
            }
            *applied = true;
        }
        Ok(appended)
    }

    /// Fail on the first override whose group nothing selected.
    fn finish(self) -> Result<(), ConfigError> {
        match self.edits.into_iter().find(|(_, applied)| !applied) {
            None => Ok(()),
            Some((o, _)) => match (o.kind, selected_option(o)) {
                (OverrideKind::Delete, _) => Err(ConfigError::MissingKey(o.key.clone())),
                (_, Some(option)) => Err(ConfigError::GroupNotSelected {
                    group: o.key.clone(),
                    option,
                }),
                (_, None) => Err(ConfigError::MissingValue(o.key.clone())),
            },
        }
    }
}

fn selected_option(o: &Override) -> Option<String> {
    o.value.as_ref().and_then(Value::as_str).map(String::from)
}
