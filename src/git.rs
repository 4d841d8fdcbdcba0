use std::fmt;
use std::path::Path;
use std::rc::Rc;

use git2::{ErrorCode, IndexAddOption, Repository, Signature, Status, StatusOptions};
use tracing::debug;

use crate::error::{KeybankError, Result};
use crate::exec::{arg, CommandOutput, CommandRunner};

/// Commit author, rendered as `name <email>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    /// `user <user@hostname>` for the given user on this machine.
    pub fn for_user(user: &str) -> Self {
        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            name: user.to_string(),
            email: format!("{user}@{host}"),
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// The embedded repository a store keeps its audit trail in.
pub trait VersionControl {
    /// Stage every addition, modification and deletion, then commit.
    fn commit_all(&self, message: &str, author: &Author) -> Result<()>;

    /// Working tree status as `XY path` lines.
    fn status(&self) -> Result<String>;

    /// Run the repository's consistency check and return its raw result.
    fn check_integrity(&self) -> Result<CommandOutput>;
}

pub struct GitRepo {
    repo: Repository,
    runner: Rc<dyn CommandRunner>,
}

impl GitRepo {
    /// Create a repository in `path`
    pub fn init(path: impl AsRef<Path>, runner: Rc<dyn CommandRunner>) -> Result<Self> {
        let repo = Repository::init(path)?;
        Ok(Self { repo, runner })
    }

    /// Open the repository whose working directory is exactly `path`
    pub fn open(path: impl AsRef<Path>, runner: Rc<dyn CommandRunner>) -> Result<Self> {
        let path = path.as_ref();
        if !path.join(".git").is_dir() {
            return Err(KeybankError::NotInitialized(path.to_path_buf()));
        }
        let repo = Repository::open(path)?;
        Ok(Self { repo, runner })
    }

    /// Get the git directory path
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Get repository root path
    pub fn workdir(&self) -> Result<&Path> {
        self.repo.workdir().ok_or(KeybankError::Other(
            "Repository has no working directory".into(),
        ))
    }

    /// Number of commits reachable from HEAD
    pub fn commit_count(&self) -> Result<usize> {
        if self.repo.is_empty()? {
            return Ok(0);
        }
        let head = match self.repo.head() {
            Ok(head) => head.peel_to_commit()?,
            Err(e) if is_unborn(&e) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut walk = self.repo.revwalk()?;
        walk.push(head.id())?;
        Ok(walk.count())
    }
}

impl VersionControl for GitRepo {
    fn commit_all(&self, message: &str, author: &Author) -> Result<()> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let signature = Signature::now(&author.name, &author.email)?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if is_unborn(&e) => None,
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<_> = parent.iter().collect();

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        debug!("created commit {} by {}", oid, author);
        Ok(())
    }

    fn status(&self) -> Result<String> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = self.repo.statuses(Some(&mut options))?;
        let lines: Vec<String> = statuses
            .iter()
            .map(|entry| {
                format!(
                    "{} {}",
                    porcelain_code(entry.status()),
                    entry.path().unwrap_or_default()
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }

    fn check_integrity(&self) -> Result<CommandOutput> {
        let workdir = self.workdir()?;
        self.runner.run(
            "git",
            &["-C".into(), arg(workdir), "fsck".into(), "--full".into()],
            None,
        )
    }
}

fn is_unborn(err: &git2::Error) -> bool {
    matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound)
}

/// Render a libgit2 status the way `git status --porcelain` does.
fn porcelain_code(status: Status) -> String {
    if status.is_conflicted() {
        return "UU".into();
    }

    let index = if status.is_index_new() {
        'A'
    } else if status.is_index_modified() {
        'M'
    } else if status.is_index_deleted() {
        'D'
    } else if status.is_index_renamed() {
        'R'
    } else if status.is_index_typechange() {
        'T'
    } else {
        ' '
    };

    if status.is_wt_new() && index == ' ' {
        return "??".into();
    }

    let worktree = if status.is_wt_modified() {
        'M'
    } else if status.is_wt_deleted() {
        'D'
    } else if status.is_wt_renamed() {
        'R'
    } else if status.is_wt_typechange() {
        'T'
    } else {
        ' '
    };

    format!("{index}{worktree}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::SystemRunner;
    use std::fs;
    use tempfile::TempDir;

    fn author() -> Author {
        Author {
            name: "test".into(),
            email: "test@test.com".into(),
        }
    }

    fn init(temp: &TempDir) -> GitRepo {
        GitRepo::init(temp.path(), Rc::new(SystemRunner)).unwrap()
    }

    #[test]
    fn test_init_and_open() {
        let temp = TempDir::new().unwrap();
        init(&temp);
        assert!(temp.path().join(".git").is_dir());

        let repo = GitRepo::open(temp.path(), Rc::new(SystemRunner)).unwrap();
        assert_eq!(repo.commit_count().unwrap(), 0);
    }

    #[test]
    fn test_open_without_repo_fails() {
        let temp = TempDir::new().unwrap();
        let result = GitRepo::open(temp.path(), Rc::new(SystemRunner));
        assert!(matches!(result, Err(KeybankError::NotInitialized(_))));
    }

    #[test]
    fn test_commit_all_and_status() {
        let temp = TempDir::new().unwrap();
        let repo = init(&temp);

        fs::write(temp.path().join("keep"), "123").unwrap();
        fs::write(temp.path().join("gone"), "456").unwrap();
        assert_eq!(repo.status().unwrap(), "?? gone\n?? keep");

        repo.commit_all("added files", &author()).unwrap();
        assert_eq!(repo.commit_count().unwrap(), 1);
        assert_eq!(repo.status().unwrap(), "");

        fs::write(temp.path().join("keep"), "78910").unwrap();
        fs::remove_file(temp.path().join("gone")).unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();
        fs::write(temp.path().join("dir/new"), "0").unwrap();

        let status = repo.status().unwrap();
        assert!(status.contains(" D gone"));
        assert!(status.contains(" M keep"));
        assert!(status.contains("?? dir/new"));

        repo.commit_all("update", &author()).unwrap();
        assert_eq!(repo.commit_count().unwrap(), 2);
        assert_eq!(repo.status().unwrap(), "");
    }

    #[test]
    fn test_staged_change_renders_index_column() {
        let temp = TempDir::new().unwrap();
        let repo = init(&temp);
        fs::write(temp.path().join("file"), "1").unwrap();

        let mut index = repo.repo.index().unwrap();
        index.add_path(Path::new("file")).unwrap();
        index.write().unwrap();

        assert_eq!(repo.status().unwrap(), "A  file");
    }

    #[test]
    fn test_check_integrity_on_healthy_repo() {
        let temp = TempDir::new().unwrap();
        let repo = init(&temp);
        fs::write(temp.path().join("file"), "1").unwrap();
        repo.commit_all("one", &author()).unwrap();

        let output = repo.check_integrity().unwrap();
        assert!(output.success, "fsck failed: {}", output.combined());
    }

    #[test]
    fn test_author_display() {
        assert_eq!(author().to_string(), "test <test@test.com>");
        assert!(Author::for_user("root").email.starts_with("root@"));
    }
}
