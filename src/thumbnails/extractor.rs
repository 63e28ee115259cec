//! Bounded-parallel frame extraction.
//!
//! A fixed number of workers claim plan indices from a shared counter and
//! write their frames into index-addressed slots, so output order always
//! matches plan order. The first failure aborts the remaining workers and
//! fails the whole batch.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{ExtractionError, FrameExtractor, FrameSource, SamplePlan, ThumbnailPair, ThumbnailResult};

pub struct ConcurrentExtractor {
    extractor: Arc<dyn FrameExtractor>,
    concurrency: usize,
}

impl ConcurrentExtractor {
    pub fn new(extractor: Arc<dyn FrameExtractor>, concurrency: usize) -> Self {
        Self {
            extractor,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn extract_all(
        &self,
        source: Arc<FrameSource>,
        plan: &SamplePlan,
    ) -> Result<Vec<ThumbnailResult>, ExtractionError> {
        let timestamps: Arc<[f64]> = plan.timestamps.clone().into();
        let extractor = self.extractor.clone();

        run_indexed(timestamps.len(), self.concurrency, move |index| {
            let extractor = extractor.clone();
            let source = source.clone();
            let timestamp = timestamps[index];
            async move {
                let image = extractor.extract_frame(&source, timestamp).await?;
                Ok(ThumbnailResult::new(index, timestamp, &image))
            }
        })
        .await
    }

    /// Extracts the same timestamps from two sources. Both frames for one
    /// timestamp are fetched concurrently and the pair fails if either does.
    pub async fn extract_pairs(
        &self,
        source_a: Arc<FrameSource>,
        source_b: Arc<FrameSource>,
        plan: &SamplePlan,
    ) -> Result<Vec<ThumbnailPair>, ExtractionError> {
        let timestamps: Arc<[f64]> = plan.timestamps.clone().into();
        let extractor = self.extractor.clone();

        run_indexed(timestamps.len(), self.concurrency, move |index| {
            let extractor = extractor.clone();
            let source_a = source_a.clone();
            let source_b = source_b.clone();
            let timestamp = timestamps[index];
            async move {
                let (image_a, image_b) = tokio::try_join!(
                    extractor.extract_frame(&source_a, timestamp),
                    extractor.extract_frame(&source_b, timestamp)
                )?;
                Ok(ThumbnailPair::new(index, timestamp, &image_a, &image_b))
            }
        })
        .await
    }
}

async fn run_indexed<T, F, Fut>(count: usize, concurrency: usize, job: F) -> Result<Vec<T>, ExtractionError>
where
    T: Send + 'static,
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ExtractionError>> + Send + 'static,
{
    if count == 0 {
        return Ok(Vec::new());
    }

    let job = Arc::new(job);
    let next = Arc::new(AtomicUsize::new(0));
    let mut workers = JoinSet::new();

    for worker in 0..concurrency.min(count) {
        let job = job.clone();
        let next = next.clone();
        workers.spawn(async move {
            let mut finished = Vec::new();
            loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                if index >= count {
                    break;
                }
                debug!("Worker {} extracting sample {}", worker, index + 1);
                finished.push((index, job(index).await?));
            }
            Ok::<_, ExtractionError>(finished)
        });
    }

    let mut slots: Vec<Option<T>> = (0..count).map(|_| None).collect();
    while let Some(joined) = workers.join_next().await {
        let outcome = joined.map_err(|err| ExtractionError::Worker(err.to_string()));
        match outcome.and_then(|finished| finished) {
            Ok(finished) => {
                for (index, item) in finished {
                    slots[index] = Some(item);
                }
            }
            Err(err) => {
                warn!("Frame extraction failed, aborting remaining workers: {}", err);
                workers.abort_all();
                return Err(err);
            }
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| ExtractionError::Worker(format!("sample {} was never extracted", index + 1)))
        })
        .collect()
}
