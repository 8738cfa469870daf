//! `workshop init [--name <name>] [--users <n>] [--path <file>]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use workshop_core::document::{init_document, init_document_at};

use super::home_dir;

/// Write a starter Workshop document.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Workshop name; also the document file name.
    #[arg(long, short = 'n', default_value = "workshop")]
    pub name: String,

    /// Number of workshop users.
    #[arg(long, short = 'u', default_value_t = 2)]
    pub users: i64,

    /// Write here instead of ~/.workshop/workshops/<name>.yaml.
    #[arg(long, short = 'p')]
    pub path: Option<PathBuf>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let (path, doc, created) = match &self.path {
            Some(path) => {
                let (doc, created) = init_document(path, &self.name, self.users)
                    .with_context(|| format!("failed to init '{}'", path.display()))?;
                (path.clone(), doc, created)
            }
            None => {
                let home = home_dir()?;
                init_document_at(&home, &self.name, self.users)
                    .with_context(|| format!("failed to init workshop '{}'", self.name))?
            }
        };

        if created {
            println!(
                "✓ Created workshop '{}' with {} users",
                doc.metadata.name,
                doc.spec.user_count()
            );
            println!("  Saved to: {}", path.display());
        } else {
            println!(
                "· Workshop document already exists, left unchanged: {}",
                path.display()
            );
        }
        Ok(())
    }
}
