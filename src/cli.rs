//! Subcommands of the `blobfs` tool.

use bytes::Bytes;
use clap::Subcommand;
use futures::TryStreamExt;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::error::{FsError, FsResult};
use crate::fs::{BlobFileSystem, FileSystem};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List files directly under a directory.
    Ls {
        #[arg(default_value = "")]
        path: String,
        /// Name filter such as `*.jpg`.
        #[arg(long, short = 'f')]
        filter: Option<String>,
    },
    /// List child directories.
    Dirs {
        #[arg(default_value = "")]
        path: String,
    },
    /// Upload a local file.
    Put {
        local: PathBuf,
        path: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Download a file; writes to stdout without a local path.
    Get { path: String, local: Option<PathBuf> },
    /// Delete a file.
    Rm { path: String },
    /// Delete a directory and everything under it.
    Rmdir {
        path: String,
        #[arg(long, short = 'r')]
        recursive: bool,
    },
    /// Show file metadata.
    Stat {
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Print the public URL of a file.
    Url { path: String },
}

/// Runs one command, writing its textual output to `out`.
pub async fn run(command: Command, fs: &BlobFileSystem, out: &mut (dyn Write + Send)) -> FsResult<()> {
    match command {
        Command::Ls { path, filter } => {
            let mut files = fs.get_files(&path, filter.as_deref());
            while let Some(file) = files.try_next().await? {
                writeln!(out, "{}", file)?;
            }
        }
        Command::Dirs { path } => {
            let mut dirs = fs.get_directories(&path);
            while let Some(dir) = dirs.try_next().await? {
                writeln!(out, "{}/", dir)?;
            }
        }
        Command::Put {
            local,
            path,
            overwrite,
        } => {
            let content = tokio::fs::read(&local).await?;
            let size = content.len();
            fs.add_file(&path, Bytes::from(content), overwrite).await?;
            writeln!(out, "{} ({} bytes)", fs.get_url(&path)?, size)?;
        }
        Command::Get { path, local } => {
            let mut content = fs.open_file(&path).await?;
            match local {
                Some(local) => {
                    let mut file = tokio::fs::File::create(&local).await?;
                    while let Some(chunk) = content.try_next().await? {
                        file.write_all(&chunk).await?;
                    }
                    file.flush().await?;
                }
                None => {
                    while let Some(chunk) = content.try_next().await? {
                        out.write_all(&chunk)?;
                    }
                }
            }
        }
        Command::Rm { path } => fs.delete_file(&path).await?,
        Command::Rmdir { path, recursive } => fs.delete_directory(&path, recursive).await?,
        Command::Stat { path, json } => {
            let info = fs.get_info(&path).await?;
            if json {
                let body = serde_json::to_string_pretty(&info)
                    .map_err(|e| FsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
                writeln!(out, "{}", body)?;
            } else {
                writeln!(out, "path:          {}", info.path)?;
                writeln!(out, "size:          {}", info.size)?;
                if let Some(ref content_type) = info.content_type {
                    writeln!(out, "content-type:  {}", content_type)?;
                }
                if let Some(ref cache_control) = info.cache_control {
                    writeln!(out, "cache-control: {}", cache_control)?;
                }
                writeln!(out, "etag:          {}", info.etag)?;
                writeln!(out, "created:       {}", info.created.to_rfc3339())?;
                writeln!(out, "last-modified: {}", info.last_modified.to_rfc3339())?;
            }
        }
        Command::Url { path } => writeln!(out, "{}", fs.get_url(&path)?)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlobFsConfig;
    use crate::storage::MemoryBlobClient;
    use clap::Parser;
    use std::sync::Arc;

    fn filesystem() -> BlobFileSystem {
        let config =
            BlobFsConfig::resolve(None, Some("UseDevelopmentStorage=true"), None, None).unwrap();
        BlobFileSystem::new(config, Arc::new(MemoryBlobClient::new("media")))
    }

    async fn run_to_string(command: Command, fs: &BlobFileSystem) -> String {
        let mut out = Vec::new();
        run(command, fs, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_arguments() {
        let args = crate::config::Args::parse_from(["blobfs", "-c", "assets", "ls", "images", "-f", "*.jpg"]);
        assert_eq!(args.container.as_deref(), Some("assets"));
        assert_eq!(
            args.command,
            Command::Ls {
                path: "images".to_string(),
                filter: Some("*.jpg".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_put_get_and_list() {
        let fs = filesystem();
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("logo.png");
        std::fs::write(&local, b"png bytes").unwrap();

        let output = run_to_string(
            Command::Put {
                local: local.clone(),
                path: "images/logo.png".to_string(),
                overwrite: false,
            },
            &fs,
        )
        .await;
        assert_eq!(
            output,
            "http://127.0.0.1:10000/devstoreaccount1/media/images/logo.png (9 bytes)\n"
        );

        let listed = run_to_string(
            Command::Ls {
                path: "images".to_string(),
                filter: None,
            },
            &fs,
        )
        .await;
        assert_eq!(listed, "images/logo.png\n");

        let downloaded = dir.path().join("copy.png");
        run_to_string(
            Command::Get {
                path: "images/logo.png".to_string(),
                local: Some(downloaded.clone()),
            },
            &fs,
        )
        .await;
        assert_eq!(std::fs::read(&downloaded).unwrap(), b"png bytes");
    }

    #[tokio::test]
    async fn test_stat_json() {
        let fs = filesystem();
        fs.add_file("a.txt", Bytes::from_static(b"hello"), false)
            .await
            .unwrap();

        let output = run_to_string(
            Command::Stat {
                path: "a.txt".to_string(),
                json: true,
            },
            &fs,
        )
        .await;
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["path"], "a.txt");
        assert_eq!(value["size"], 5);
        assert_eq!(value["content_type"], "text/plain");
    }

    #[tokio::test]
    async fn test_rm_missing_file_succeeds() {
        let fs = filesystem();
        let output = run_to_string(
            Command::Rm {
                path: "nope.txt".to_string(),
            },
            &fs,
        )
        .await;
        assert!(output.is_empty());
    }
}
