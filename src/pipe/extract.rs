//! Bounded-wait extraction of context values

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use super::context::{ContextStore, ContextValue, Destination, SharedBuffer, SharedPipe};
use crate::types::{CourierError, Result};

/// Default budget for [`extract`]
pub const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);

const COPY_CHUNK: usize = 8 * 1024;

/// Copy the readable value stored at `key` into `dest`
///
/// Shape checks fail immediately. The copy itself runs on a spawned task and
/// the caller waits at most `timeout` for it. A copy that outlives the budget
/// is left running (it holds the source pipe's lock until its producer
/// finishes); only the caller stops waiting.
///
/// Returns the number of bytes copied.
pub async fn extract(
    store: &ContextStore,
    key: &str,
    dest: &ContextValue,
    timeout: Duration,
) -> Result<u64> {
    let source = store
        .get(key)
        .ok_or_else(|| CourierError::NotFound(key.to_string()))?
        .readable(key)?;
    let dest = dest.writable(key)?;

    debug!("Extracting context value '{}' (budget {:?})", key, timeout);

    let copy = tokio::spawn(copy_into(source, dest));

    match tokio::time::timeout(timeout, copy).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(CourierError::Internal(format!("extraction task failed: {}", e))),
        Err(_) => {
            warn!("Extraction of '{}' timed out after {:?}", key, timeout);
            Err(CourierError::ExtractionTimeout {
                key: key.to_string(),
                seconds: timeout.as_secs(),
            })
        }
    }
}

/// Extract the value at `key` and decode it as JSON
pub async fn extract_json<T: DeserializeOwned>(
    store: &ContextStore,
    key: &str,
    timeout: Duration,
) -> Result<T> {
    let buffer = SharedBuffer::new();
    extract(store, key, &ContextValue::Buffer(buffer.clone()), timeout).await?;

    let bytes = buffer.contents().await;
    serde_json::from_slice(&bytes)
        .map_err(|e| CourierError::Decode(format!("context value '{}': {}", key, e)))
}

async fn copy_into(source: SharedPipe, mut dest: Destination) -> Result<u64> {
    let mut pipe = source.lock().await;
    pipe.rewind();

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dest.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{channel, keys, Pipe};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_readable_fails_promptly() {
        let store = ContextStore::new();
        store.insert(keys::NODE, ContextValue::Text("not a stream".into()));

        let started = tokio::time::Instant::now();
        let err = extract(
            &store,
            keys::NODE,
            &ContextValue::Buffer(SharedBuffer::new()),
            EXTRACTION_TIMEOUT,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CourierError::NotReadable(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_not_writable_destination() {
        let store = ContextStore::new();
        store.insert(keys::NODE, ContextValue::pipe(Pipe::from_bytes(&b"{}"[..])));

        let err = extract(
            &store,
            keys::NODE,
            &ContextValue::Text("nope".into()),
            EXTRACTION_TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CourierError::NotWritable(_)));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let store = ContextStore::new();
        let err = extract_json::<Sample>(&store, keys::NODE, EXTRACTION_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::NotFound(key) if key == keys::NODE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_producer_times_out_at_budget() {
        let (writer, pipe) = channel();
        let store = ContextStore::new();
        store.insert(keys::NODE, ContextValue::pipe(pipe));

        // Writes a little, then never closes
        writer.write(b"{\"name\":").await.unwrap();

        let started = tokio::time::Instant::now();
        let err = extract_json::<Sample>(&store, keys::NODE, EXTRACTION_TIMEOUT)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, CourierError::ExtractionTimeout { seconds: 30, .. }));
        assert!(elapsed >= EXTRACTION_TIMEOUT);
        assert!(elapsed < EXTRACTION_TIMEOUT + Duration::from_secs(1));

        // The producer finishing later does not change the outcome
        writer.write(b"\"late\"}").await.unwrap();
        writer.close();
    }

    #[tokio::test]
    async fn test_extract_json_from_producer() {
        let (writer, pipe) = channel();
        let store = ContextStore::new();
        store.insert(keys::NODE, ContextValue::pipe(pipe));

        tokio::spawn(async move {
            writer.write(br#"{"name":"#).await.unwrap();
            writer.write(br#""report.pdf"}"#).await.unwrap();
            writer.close();
        });

        let sample: Sample = extract_json(&store, keys::NODE, EXTRACTION_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(sample.name, "report.pdf");
    }

    #[tokio::test]
    async fn test_repeated_extraction_replays_value() {
        let store = ContextStore::new();
        store.insert(
            keys::NODE,
            ContextValue::pipe(Pipe::from_bytes(&br#"{"name":"a"}"#[..])),
        );

        for _ in 0..3 {
            let sample: Sample = extract_json(&store, keys::NODE, EXTRACTION_TIMEOUT)
                .await
                .unwrap();
            assert_eq!(sample, Sample { name: "a".into() });
        }
    }

    #[tokio::test]
    async fn test_extract_into_writer() {
        let store = ContextStore::new();
        store.insert("payload", ContextValue::pipe(Pipe::from_bytes(&b"forwarded"[..])));

        let (writer, mut target) = channel();
        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            target.read_to_end(&mut out).await.unwrap();
            out
        });

        let copied = extract(&store, "payload", &ContextValue::Writer(writer), EXTRACTION_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(copied, 9);
        assert_eq!(reader.await.unwrap(), b"forwarded");
    }

    #[tokio::test]
    async fn test_bad_json_is_decode_error() {
        let store = ContextStore::new();
        store.insert(keys::NODE, ContextValue::pipe(Pipe::from_bytes(&b"{not json"[..])));
        let err = extract_json::<Sample>(&store, keys::NODE, EXTRACTION_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Decode(_)));
    }
}
