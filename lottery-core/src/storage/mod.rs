use crate::error::{LotteryError, Result};
use crate::types::Bet;
use csv_async::{AsyncReader, AsyncReaderBuilder, AsyncWriterBuilder, StringRecord};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::sync::Mutex;

/// Append-only bet ledger backed by a headerless CSV file.
///
/// Writers are serialised through an async mutex held for exactly one
/// batch, so rows from concurrent submissions never interleave.
pub struct Ledger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Ledger {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LotteryError::config(format!(
                    "Failed to create ledger directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist every bet of the batch, returning how many rows were written.
    pub async fn append(&self, bets: &[Bet]) -> Result<usize> {
        if bets.is_empty() {
            return Ok(0);
        }

        {
            let _guard = self.lock.lock().await;

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            let mut writer = AsyncWriterBuilder::new()
                .has_headers(false)
                .create_writer(file);

            for bet in bets {
                writer.write_record(&bet.to_fields()).await?;
            }
            writer.flush().await?;
        }

        for bet in bets {
            tracing::info!(
                action = "store_bets",
                result = "success",
                document = bet.document(),
                number = bet.number(),
                "Stored bet"
            );
        }

        Ok(bets.len())
    }

    /// Lazily read every stored bet, front to back.
    ///
    /// Each call re-opens the file, so the scan can be restarted. A ledger
    /// that has never been written scans as empty.
    pub fn scan_all(&self) -> BoxStream<'static, Result<Bet>> {
        let path = self.path.clone();

        stream::try_unfold(
            (None::<AsyncReader<File>>, 0usize),
            move |(reader, row)| {
                let path = path.clone();
                async move {
                    let mut reader = match reader {
                        Some(reader) => reader,
                        None => match open_reader(&path).await? {
                            Some(reader) => reader,
                            None => return Ok(None),
                        },
                    };

                    let mut record = StringRecord::new();
                    if !reader.read_record(&mut record).await? {
                        return Ok(None);
                    }

                    let fields: Vec<&str> = record.iter().collect();
                    let bet = Bet::parse(&fields).map_err(|e| {
                        LotteryError::decode(format!("ledger row {}: {}", row + 1, e))
                    })?;

                    Ok::<_, LotteryError>(Some((bet, (Some(reader), row + 1))))
                }
            },
        )
        .boxed()
    }

    pub async fn load_all(&self) -> Result<Vec<Bet>> {
        self.scan_all().try_collect().await
    }
}

async fn open_reader(path: &Path) -> Result<Option<AsyncReader<File>>> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(
        AsyncReaderBuilder::new()
            .has_headers(false)
            .create_reader(file),
    ))
}
