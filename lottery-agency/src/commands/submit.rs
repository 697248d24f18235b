use crate::config::AgencyConfig;
use anyhow::{bail, Context};
use csv_async::AsyncReaderBuilder;
use futures::StreamExt;
use lottery_core::{codec, AgencyId, Bet, Framer, LotteryError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Totals of one finished submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub batches: usize,
    pub bets: usize,
}

/// Groups bets into batches bounded by count and encoded size.
pub struct Batcher {
    batch_size: usize,
    max_bytes: usize,
    pending: Vec<Bet>,
    pending_bytes: usize,
}

impl Batcher {
    pub fn new(batch_size: usize, max_bytes: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_bytes,
            pending: Vec::new(),
            pending_bytes: 0,
        }
    }

    /// Add a bet, handing back the previous batch if this one does not fit.
    pub fn push(&mut self, bet: Bet) -> Option<Vec<Bet>> {
        let bytes = bet.to_record().len();

        let full = !self.pending.is_empty()
            && (self.pending.len() >= self.batch_size
                || self.pending_bytes + 1 + bytes > self.max_bytes);
        let ready = if full {
            self.pending_bytes = 0;
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        };

        // Records are joined by a one-byte delimiter.
        self.pending_bytes += if self.pending.is_empty() { bytes } else { bytes + 1 };
        self.pending.push(bet);
        ready
    }

    pub fn finish(self) -> Vec<Bet> {
        self.pending
    }
}

/// Submit the configured bets file over a fresh connection.
pub async fn submit_bets(config: &AgencyConfig) -> anyhow::Result<SubmitReport> {
    let file = tokio::fs::File::open(&config.bets_file)
        .await
        .with_context(|| format!("Failed to open bets file {}", config.bets_file.display()))?;

    let stream = TcpStream::connect(config.submissions_addr())
        .await
        .with_context(|| format!("Failed to connect to {}", config.submissions_addr()))?;
    let mut framer = Framer::new(stream, config.protocol.clone());

    submit_from(&mut framer, config.agency, file, config.batch_size).await
}

/// Stream headerless `first_name,last_name,document,birthdate,number` rows
/// from `source` and send them as batches, the last one flagged end-of-stream.
pub async fn submit_from<S, R>(
    framer: &mut Framer<S>,
    agency: AgencyId,
    source: R,
    batch_size: usize,
) -> anyhow::Result<SubmitReport>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin + Send,
{
    let max_bytes = framer.config().max_packet_size;
    let agency_field = agency.to_string();
    let mut batcher = Batcher::new(batch_size, max_bytes);
    let mut report = SubmitReport::default();

    let mut reader = AsyncReaderBuilder::new()
        .has_headers(false)
        .create_reader(source);
    let mut records = reader.records();

    while let Some(record) = records.next().await {
        let record = record.map_err(LotteryError::from)?;
        let mut fields = vec![agency_field.as_str()];
        fields.extend(record.iter());

        let bet = Bet::parse(&fields).with_context(|| match record.position() {
            Some(pos) => format!("Invalid bet on line {}", pos.line()),
            None => "Invalid bet".to_string(),
        })?;

        if let Some(batch) = batcher.push(bet) {
            send_batch(framer, agency, &batch, false, &mut report).await?;
        }
    }

    send_batch(framer, agency, &batcher.finish(), true, &mut report).await?;
    Ok(report)
}

async fn send_batch<S>(
    framer: &mut Framer<S>,
    agency: AgencyId,
    batch: &[Bet],
    eof: bool,
    report: &mut SubmitReport,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = codec::encode(agency, batch)?;
    framer.send_message(&payload, eof).await?;

    if !framer.receive_ack().await? {
        tracing::error!(
            action = "submit_batch",
            result = "fail",
            agency,
            count = batch.len(),
            "Server rejected batch"
        );
        bail!("Server rejected batch {} of agency {}", report.batches + 1, agency);
    }

    report.batches += 1;
    report.bets += batch.len();
    tracing::info!(
        action = "submit_batch",
        result = "success",
        agency,
        count = batch.len(),
        eof,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use lottery_core::ProtocolConfig;
    use tokio::io::duplex;

    fn bet(document: &str) -> Bet {
        let birthdate = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        Bet::new(1, "Ana", "Gil", document, birthdate, 42).unwrap()
    }

    #[test]
    fn test_batcher_splits_by_count() {
        let mut batcher = Batcher::new(2, 8192);
        assert!(batcher.push(bet("1")).is_none());
        assert!(batcher.push(bet("2")).is_none());

        let full = batcher.push(bet("3")).unwrap();
        assert_eq!(full.len(), 2);
        assert_eq!(batcher.finish().len(), 1);
    }

    #[test]
    fn test_batcher_splits_by_size() {
        let record_len = bet("1").to_record().len();
        let mut batcher = Batcher::new(100, record_len * 2);

        assert!(batcher.push(bet("1")).is_none());
        // Two records plus a separator no longer fit.
        let full = batcher.push(bet("2")).unwrap();
        assert_eq!(full.len(), 1);
        assert_eq!(batcher.finish().len(), 1);
    }

    /// Accept batches until end-of-stream, acking each, and return them.
    async fn fake_server<S>(mut framer: Framer<S>, accept: bool) -> Vec<(String, bool)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut received = Vec::new();
        loop {
            let Ok((payload, eof)) = framer.receive_message().await else {
                break;
            };
            received.push((payload, eof));
            framer.send_ack(accept).await.unwrap();
            if eof || !accept {
                break;
            }
        }
        received
    }

    #[tokio::test]
    async fn test_submits_file_in_batches() {
        let (client, server) = duplex(32);
        let server = tokio::spawn(fake_server(
            Framer::new(server, ProtocolConfig::default()),
            true,
        ));

        let source: &[u8] = b"Ana,Gil,1,2000-01-01,42\nLuis,Paz,2,1990-12-31,7574\nEva,Sol,3,1985-06-15,1\n";
        let mut framer = Framer::new(client, ProtocolConfig::default());
        let report = submit_from(&mut framer, 4, source, 2).await.unwrap();
        assert_eq!(report, SubmitReport { batches: 2, bets: 3 });

        let received = server.await.unwrap();
        assert_eq!(received.len(), 2);
        assert!(!received[0].1);
        assert!(received[1].1);

        let first = codec::decode(&received[0].0).unwrap();
        assert_eq!(first.agency, 4);
        assert_eq!(first.bets.len(), 2);
        assert_eq!(first.bets[1].number(), 7574);
    }

    #[tokio::test]
    async fn test_empty_file_sends_bare_eof() {
        let (client, server) = duplex(32);
        let server = tokio::spawn(fake_server(
            Framer::new(server, ProtocolConfig::default()),
            true,
        ));

        let mut framer = Framer::new(client, ProtocolConfig::default());
        let report = submit_from(&mut framer, 3, &b""[..], 10).await.unwrap();
        assert_eq!(report, SubmitReport { batches: 1, bets: 0 });

        let received = server.await.unwrap();
        assert_eq!(received, vec![("3".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_negative_ack_stops_submission() {
        let (client, server) = duplex(32);
        let server = tokio::spawn(fake_server(
            Framer::new(server, ProtocolConfig::default()),
            false,
        ));

        let source: &[u8] = b"Ana,Gil,1,2000-01-01,42\nLuis,Paz,2,1990-12-31,7\n";
        let mut framer = Framer::new(client, ProtocolConfig::default());
        assert!(submit_from(&mut framer, 1, source, 1).await.is_err());
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_row_is_reported_before_sending() {
        let (client, _server) = duplex(32);
        let mut framer = Framer::new(client, ProtocolConfig::default());

        let source: &[u8] = b"Ana,Gil,1,not-a-date,42\n";
        let err = submit_from(&mut framer, 1, source, 10).await.unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[tokio::test]
    async fn test_submit_bets_reads_file_and_connects() {
        let dir = tempfile::tempdir().unwrap();
        let bets_file = dir.path().join("agency-2.csv");
        tokio::fs::write(&bets_file, "Ana,Gil,1,2000-01-01,7574\nLuis,Paz,2,1990-12-31,3\n")
            .await
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            fake_server(Framer::new(stream, ProtocolConfig::default()), true).await
        });

        let config = AgencyConfig {
            agency: 2,
            submissions_port: port,
            bets_file,
            ..AgencyConfig::default()
        };
        let report = submit_bets(&config).await.unwrap();
        assert_eq!(report, SubmitReport { batches: 1, bets: 2 });

        let received = server.await.unwrap();
        assert_eq!(received.len(), 1);
        let batch = codec::decode(&received[0].0).unwrap();
        assert_eq!(batch.agency, 2);
        assert!(batch.bets[0].has_won());
        assert!(received[0].1);
    }

    #[tokio::test]
    async fn test_missing_bets_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgencyConfig {
            bets_file: dir.path().join("missing.csv"),
            ..AgencyConfig::default()
        };

        let err = submit_bets(&config).await.unwrap_err();
        assert!(err.to_string().contains("Failed to open bets file"));
    }
}
