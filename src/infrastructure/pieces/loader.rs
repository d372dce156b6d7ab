//! Piece definitions from YAML files

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Piece;
use crate::domain::ports::PieceSource;

/// Used for `default` when no file defines it.
pub const BUILTIN_DEFAULT_PIECE: &str = r#"
name: default
description: plan, implement, review
max_movements: 30
movements:
  - name: plan
    persona: planner
    instruction: |
      Analyse the task and write an implementation plan.

      {task}
    rules:
      - condition: Plan is ready
        next: implement
      - condition: ai("The requirements are unclear and cannot be planned")
        next: ABORT
  - name: implement
    persona: coder
    edit: true
    required_permission_mode: edit
    instruction: |
      Implement the plan.

      Task: {task}

      Plan:
      {previous_response}
    rules:
      - condition: Implementation is complete
        next: review
      - condition: Cannot proceed
        next: ABORT
  - name: review
    persona: reviewer
    instruction: |
      Review the changes made for this task.

      Task: {task}
    rules:
      - condition: Approved
        next: COMPLETE
      - condition: Needs fixes
        next: implement
"#;

/// Looks pieces up by name in a list of directories, first hit wins.
pub struct PieceLoader {
    search_dirs: Vec<PathBuf>,
}

impl PieceLoader {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Project pieces, then the user's.
    pub fn for_project(project_pieces_dir: PathBuf, global_dir: Option<PathBuf>) -> Self {
        let mut dirs = vec![project_pieces_dir];
        dirs.extend(global_dir.map(|dir| dir.join("pieces")));
        Self::new(dirs)
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .flat_map(|dir| [dir.join(format!("{name}.yaml")), dir.join(format!("{name}.yml"))])
            .find(|path| path.is_file())
    }

    /// Load and validate a piece file.
    pub async fn load_from_file(path: &Path) -> DomainResult<Piece> {
        debug!("Loading piece from: {}", path.display());
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            DomainError::InvalidPiece(format!("failed to read {}: {e}", path.display()))
        })?;
        Piece::from_yaml_str(&content)
            .map_err(|e| DomainError::InvalidPiece(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl PieceSource for PieceLoader {
    async fn load(&self, name: &str) -> DomainResult<Piece> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(DomainError::PieceNotFound(name.to_string()));
        }
        if let Some(path) = self.find(name) {
            let piece = Self::load_from_file(&path).await?;
            info!(piece = %piece.name, path = %path.display(), "piece loaded");
            return Ok(piece);
        }
        if name == "default" {
            debug!("using built-in default piece");
            return Piece::from_yaml_str(BUILTIN_DEFAULT_PIECE);
        }
        Err(DomainError::PieceNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const REVIEW_ONLY: &str = "
name: review-only
movements:
  - name: review
    persona: reviewer
    rules:
      - condition: ok
        next: COMPLETE
";

    #[tokio::test]
    async fn test_project_dir_wins_over_global() {
        let project = tempfile::tempdir().unwrap();
        let global = tempfile::tempdir().unwrap();
        fs::write(project.path().join("review-only.yaml"), REVIEW_ONLY).unwrap();
        fs::create_dir_all(global.path().join("pieces")).unwrap();
        fs::write(
            global.path().join("pieces").join("review-only.yaml"),
            REVIEW_ONLY.replace("reviewer", "other"),
        )
        .unwrap();

        let loader = PieceLoader::for_project(
            project.path().to_path_buf(),
            Some(global.path().to_path_buf()),
        );
        let piece = loader.load("review-only").await.unwrap();
        assert_eq!(piece.movements[0].persona, "reviewer");
    }

    #[tokio::test]
    async fn test_builtin_default_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let loader = PieceLoader::new(vec![dir.path().to_path_buf()]);

        let piece = loader.load("default").await.unwrap();
        assert_eq!(piece.initial_movement(), Some("plan"));

        let err = loader.load("nope").await.unwrap_err();
        assert!(matches!(err, DomainError::PieceNotFound(_)));
        assert!(loader.load("../escape").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_piece_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.yml"), "name: bad\nmovements: []\n").unwrap();
        let loader = PieceLoader::new(vec![dir.path().to_path_buf()]);
        assert!(matches!(
            loader.load("bad").await,
            Err(DomainError::InvalidPiece(_))
        ));
    }
}
