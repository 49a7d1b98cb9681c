//! Bidirectional byte copy between two independent directions. Per design
//! note 9, the two directions are disjoint copies with no shared buffer, but
//! unlike a plain `tokio::join!` over two `tokio::io::copy` calls, the two
//! directions here are *raced*: each direction owns its stream halves by
//! value, so `tokio::select!` dropping the losing branch's future drops (and
//! so closes) that side's halves the moment the other side reaches EOF. This
//! is what spec.md's "when either side ends, both are closed" requires —
//! borrowing both halves in a `tokio::join!` never cancels the still-blocked
//! reader on the winning side.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub enum SpliceOutcome {
    /// Both directions ran to completion (EOF or error) before any duration
    /// cap elapsed.
    Completed { a_to_b: u64, b_to_a: u64 },
    /// The duration cap elapsed first; both streams were dropped (and thus
    /// closed) without a final byte count.
    TimedOut,
}

const COPY_BUF_SIZE: usize = 8 * 1024;

/// Copies `reader` into `writer` until EOF or error, shutting `writer` down
/// on a clean EOF so the peer observes the close. Takes both halves by
/// value: when this future is dropped mid-read (the losing side of a
/// `select!`), the halves it owns are dropped with it, closing that side.
async fn copy_counted<R, W>(mut reader: R, mut writer: W, counter: Arc<AtomicU64>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; COPY_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            let _ = writer.shutdown().await;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Splice `(r1, w1)` against `(r2, w2)`: bytes read from `r1` are written to
/// `w2`, and bytes read from `r2` are written to `w1`. The two directions
/// race each other; whichever finishes first forces the other's streams
/// closed. If `duration_cap` is set, the whole operation is aborted once it
/// elapses.
pub async fn splice<R1, W1, R2, W2>(
    r1: R1,
    w1: W1,
    r2: R2,
    w2: W2,
    duration_cap: Option<Duration>,
) -> SpliceOutcome
where
    R1: AsyncRead + Unpin + Send,
    W1: AsyncWrite + Unpin + Send,
    R2: AsyncRead + Unpin + Send,
    W2: AsyncWrite + Unpin + Send,
{
    let a_to_b = Arc::new(AtomicU64::new(0));
    let b_to_a = Arc::new(AtomicU64::new(0));

    let race = async {
        let copy_a = copy_counted(r1, w2, a_to_b.clone());
        let copy_b = copy_counted(r2, w1, b_to_a.clone());
        tokio::pin!(copy_a);
        tokio::pin!(copy_b);

        tokio::select! {
            _ = &mut copy_a => {}
            _ = &mut copy_b => {}
        }
        // The loser is dropped here (its stream halves with it), forcing
        // the peer's still-blocked read to observe a close.
    };

    match duration_cap {
        Some(cap) => match tokio::time::timeout(cap, race).await {
            Ok(()) => SpliceOutcome::Completed {
                a_to_b: a_to_b.load(Ordering::Relaxed),
                b_to_a: b_to_a.load(Ordering::Relaxed),
            },
            Err(_) => SpliceOutcome::TimedOut,
        },
        None => {
            race.await;
            SpliceOutcome::Completed {
                a_to_b: a_to_b.load(Ordering::Relaxed),
                b_to_a: b_to_a.load(Ordering::Relaxed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn splice_copies_both_directions() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (a_client, mut a_server) = duplex(64);
        let (b_client, mut b_server) = duplex(64);

        let (ar, aw) = tokio::io::split(a_client);
        let (br, bw) = tokio::io::split(b_client);

        a_server.write_all(b"ping").await.unwrap();
        drop(a_server);

        let outcome = splice(ar, aw, br, bw, None).await;
        match outcome {
            SpliceOutcome::Completed { a_to_b, .. } => assert_eq!(a_to_b, 4),
            SpliceOutcome::TimedOut => panic!("should not time out"),
        }

        let mut got = vec![0u8; 4];
        b_server.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"ping");
    }

    #[tokio::test]
    async fn splice_unblocks_the_other_direction_when_one_side_closes() {
        use tokio::io::AsyncWriteExt;

        // b_server never writes or closes; if the two directions were
        // joined instead of raced, this test would hang forever waiting on
        // br's read.
        let (a_client, mut a_server) = duplex(64);
        let (b_client, _b_server) = duplex(64);

        let (ar, aw) = tokio::io::split(a_client);
        let (br, bw) = tokio::io::split(b_client);

        drop(a_server.shutdown().await);
        drop(a_server);

        let outcome = splice(ar, aw, br, bw, Some(Duration::from_secs(5))).await;
        match outcome {
            SpliceOutcome::Completed { .. } => {}
            SpliceOutcome::TimedOut => panic!("a-side EOF should have forced the race to finish"),
        }
    }
}
