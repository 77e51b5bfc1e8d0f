use msgport_core::{Complete, Error, SendItem, SendQueue};
use msgport_frame::write_frame;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Body of a port's writer task.
///
/// Owns the write half and the send queue. One frame is encoded at a time;
/// submissions arriving meanwhile wait in the queue. The first write error
/// is published on `failed` before anything else happens, so the read side
/// sees it as soon as any send does. The stream is then shut down, the
/// submission channel closed, and the in-flight item followed by every
/// queued item completed with that error, oldest first.
pub(crate) async fn run_writer<W, C>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<SendItem<C>>,
    max_payload: usize,
    failed: watch::Sender<Option<Error>>,
) where
    W: AsyncWrite + Unpin,
    C: Complete,
{
    let mut queue = SendQueue::new();
    loop {
        let item = match queue.pop() {
            Some(item) => item,
            None => match rx.recv().await {
                Some(item) => item,
                None => break,
            },
        };

        let result = write_frame(&mut writer, item.buffer.as_slice(), max_payload).await;
        while let Ok(next) = rx.try_recv() {
            queue.push_item(next);
        }

        if let Err(err) = result {
            warn!(error = %err, pending = queue.len(), "send failed; failing queued sends");
            failed.send_replace(Some(err.clone()));
            let _ = writer.shutdown().await;
            rx.close();
            while let Ok(next) = rx.try_recv() {
                queue.push_item(next);
            }
            item.complete(Err(err.clone()));
            queue.fail_all(&err);
            return;
        }
        item.complete(Ok(()));
    }

    debug!("send channel closed; writer finished");
    let _ = writer.shutdown().await;
}
