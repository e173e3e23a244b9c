//! A [`StatusProvider`] backed by the `git` command line.
//!
//! Each directory enumeration runs two commands from the working copy root:
//!
//! - `git ls-files -v -z` for the tracked members and their index flags
//!   (lowercase tags mean assume-unchanged, `S` means skip-worktree)
//! - `git status --porcelain=v1 -z --ignored=matching` for everything that
//!   differs from a clean checkout
//!
//! Both are restricted to the directory with a pathspec. Their records are
//! folded onto the directory's immediate members, so a change deep below a
//! child directory only marks that child as present; its own crawl reports
//! the detail.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::trace;
use wcs_cache::{ProviderError, RawStatus, StatusProvider};
use wcs_core::StatusKind;

/// Status provider that shells out to `git`.
#[derive(Debug, Clone)]
pub struct GitCliProvider {
    program: String,
    admin_dir_name: String,
}

impl GitCliProvider {
    /// Creates a provider that runs `git` from `PATH`.
    pub fn new(admin_dir_name: impl Into<String>) -> Self {
        Self {
            program: "git".to_owned(),
            admin_dir_name: admin_dir_name.into(),
        }
    }

    /// Uses a different `git` executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, root: &Utf8Path, args: &[&str], dir: &Utf8Path) -> Result<Vec<u8>, ProviderError> {
        trace!(root = %root, ?args, "Running git");
        let output = Command::new(&self.program)
            .arg("-C")
            .arg(root.as_std_path())
            .args(args)
            .output()
            .map_err(|err| ProviderError::io(dir, err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::failed(dir, stderr.trim()));
        }
        Ok(output.stdout)
    }
}

impl StatusProvider for GitCliProvider {
    fn working_copy_root(&self, path: &Utf8Path) -> Option<Utf8PathBuf> {
        // Submodules carry a `.git` file rather than a directory.
        path.ancestors()
            .find(|ancestor| ancestor.join(&self.admin_dir_name).exists())
            .map(Utf8Path::to_owned)
    }

    fn enumerate(
        &self,
        root: &Utf8Path,
        subpath: &str,
        sink: &mut dyn FnMut(&RawStatus) -> ControlFlow<()>,
    ) -> Result<(), ProviderError> {
        let dir = if subpath.is_empty() {
            root.to_owned()
        } else {
            root.join(subpath)
        };
        let pathspec = if subpath.is_empty() { "." } else { subpath };
        let mut members: BTreeMap<String, RawStatus> = BTreeMap::new();

        let index = self.run(root, &["ls-files", "-v", "-z", "--", pathspec], &dir)?;
        let index = parse_ls_files(&index).map_err(|message| ProviderError::malformed(&dir, message))?;
        for entry in &index {
            let Some((name, nested)) = immediate_member(subpath, &entry.path) else {
                continue;
            };
            let member = members
                .entry(name.to_owned())
                .or_insert_with(|| new_member(&dir, name, StatusKind::Normal, nested));
            if !nested {
                member.assume_valid = entry.assume_valid;
                member.skip_worktree = entry.skip_worktree;
                if entry.unmerged {
                    member.text_status = StatusKind::Conflicted;
                }
            }
        }

        let changes = self.run(
            root,
            &[
                "status",
                "--porcelain=v1",
                "-z",
                "--ignored=matching",
                "--untracked-files=normal",
                "--",
                pathspec,
            ],
            &dir,
        )?;
        let changes = parse_porcelain(&changes).map_err(|message| ProviderError::malformed(&dir, message))?;
        let mut own_kind = None;
        for change in &changes {
            if !subpath.is_empty() && change.path == subpath {
                own_kind = Some(status_from_xy(change.x, change.y));
                continue;
            }
            // Inside an ignored or untracked directory git reports only
            // that ancestor.
            if is_ancestor(&change.path, subpath) {
                let kind = status_from_xy(change.x, change.y);
                if matches!(kind, StatusKind::Unversioned | StatusKind::Ignored) {
                    own_kind = Some(kind);
                }
                continue;
            }
            let Some((name, nested)) = immediate_member(subpath, &change.path) else {
                continue;
            };
            if nested {
                members
                    .entry(name.to_owned())
                    .or_insert_with(|| new_member(&dir, name, StatusKind::Unversioned, true));
                continue;
            }
            let kind = status_from_xy(change.x, change.y);
            let member = members
                .entry(name.to_owned())
                .or_insert_with(|| new_member(&dir, name, kind, change.is_dir));
            member.text_status = kind;
            member.is_dir |= change.is_dir;
        }

        // Git never lists an empty untracked directory.
        let untracked = index.is_empty()
            && changes.iter().all(|change| {
                matches!(
                    status_from_xy(change.x, change.y),
                    StatusKind::Unversioned | StatusKind::Ignored
                )
            });
        if own_kind.is_none() && !subpath.is_empty() && untracked {
            own_kind = Some(StatusKind::Unversioned);
        }

        // Git reports an untracked or ignored directory as a single record,
        // so its members inherit the directory's status.
        if let Some(kind) = own_kind {
            for entry in dir.read_dir_utf8().map_err(|err| ProviderError::io(&dir, err))? {
                let entry = entry.map_err(|err| ProviderError::io(&dir, err))?;
                let name = entry.file_name();
                if name == self.admin_dir_name {
                    continue;
                }
                members
                    .entry(name.to_owned())
                    .or_insert_with(|| new_member(&dir, name, kind, false));
            }
            let own = RawStatus {
                is_dir: true,
                ..new_member(root, subpath, kind, true)
            };
            if sink(&own).is_break() {
                return Ok(());
            }
        }

        trace!(dir = %dir, members = members.len(), "Enumerated");
        for raw in members.values() {
            if sink(raw).is_break() {
                break;
            }
        }
        Ok(())
    }
}

fn new_member(dir: &Utf8Path, name: &str, kind: StatusKind, is_dir: bool) -> RawStatus {
    let path = dir.join(name);
    let is_dir = is_dir || path.is_dir();
    RawStatus {
        path,
        text_status: kind,
        prop_status: StatusKind::None,
        is_dir,
        assume_valid: false,
        skip_worktree: false,
    }
}

/// One `git ls-files -v` record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    path: String,
    assume_valid: bool,
    skip_worktree: bool,
    unmerged: bool,
}

/// One `git status --porcelain=v1` record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChangeEntry {
    x: u8,
    y: u8,
    path: String,
    is_dir: bool,
}

fn records(output: &[u8]) -> impl Iterator<Item = &[u8]> {
    output.split(|b| *b == 0).filter(|r| !r.is_empty())
}

fn record_path(record: &[u8], offset: usize) -> Result<&str, String> {
    std::str::from_utf8(&record[offset..]).map_err(|_| "path is not valid UTF-8".to_owned())
}

fn parse_ls_files(output: &[u8]) -> Result<Vec<IndexEntry>, String> {
    records(output)
        .map(|record| {
            if record.len() < 3 || record[1] != b' ' {
                return Err(format!("unexpected ls-files record {:?}", String::from_utf8_lossy(record)));
            }
            let tag = record[0];
            Ok(IndexEntry {
                path: record_path(record, 2)?.to_owned(),
                assume_valid: tag.is_ascii_lowercase(),
                skip_worktree: tag.eq_ignore_ascii_case(&b'S'),
                unmerged: tag.eq_ignore_ascii_case(&b'M'),
            })
        })
        .collect()
}

fn parse_porcelain(output: &[u8]) -> Result<Vec<ChangeEntry>, String> {
    let mut entries = Vec::new();
    let mut iter = records(output);
    while let Some(record) = iter.next() {
        if record.len() < 4 || record[2] != b' ' {
            return Err(format!("unexpected status record {:?}", String::from_utf8_lossy(record)));
        }
        let (x, y) = (record[0], record[1]);
        let raw_path = record_path(record, 3)?;
        let is_dir = raw_path.ends_with('/');
        entries.push(ChangeEntry {
            x,
            y,
            path: raw_path.trim_end_matches('/').to_owned(),
            is_dir,
        });
        // Renames and copies are followed by the source path.
        if matches!(x, b'R' | b'C') && iter.next().is_none() {
            return Err("rename record without a source path".to_owned());
        }
    }
    Ok(entries)
}

/// Maps a porcelain `XY` pair to a status.
fn status_from_xy(x: u8, y: u8) -> StatusKind {
    match (x, y) {
        (b'?', b'?') => StatusKind::Unversioned,
        (b'!', b'!') => StatusKind::Ignored,
        (b'D', b'D') | (b'A', b'A') | (b'U', _) | (_, b'U') => StatusKind::Conflicted,
        (b'A' | b'R' | b'C', _) => StatusKind::Added,
        (b'D', _) => StatusKind::Deleted,
        (_, b'D') => StatusKind::Missing,
        (b'M' | b'T', _) | (_, b'M' | b'T') => StatusKind::Modified,
        _ => StatusKind::Normal,
    }
}

/// Returns `true` if the root-relative `ancestor` lies strictly above
/// `subpath`.
fn is_ancestor(ancestor: &str, subpath: &str) -> bool {
    subpath
        .strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Resolves a root-relative path to the immediate member of `subpath` it
/// belongs to. The flag is `true` when `rel` lies below that member.
fn immediate_member<'a>(subpath: &str, rel: &'a str) -> Option<(&'a str, bool)> {
    let rest = if subpath.is_empty() {
        rel
    } else {
        rel.strip_prefix(subpath)?.strip_prefix('/')?
    };
    if rest.is_empty() {
        return None;
    }
    match rest.split_once('/') {
        Some((name, _)) => Some((name, true)),
        None => Some((rest, false)),
    }
}
