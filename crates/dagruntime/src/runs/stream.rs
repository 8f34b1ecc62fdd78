use super::RunRegistry;
use async_stream::stream;
use chrono::{DateTime, Utc};
use dagcore::{RunEvent, RunId};
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One message to a run observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamFrame {
    NotFound,
    Log(RunEvent),
    Heartbeat { at: DateTime<Utc> },
    Done { finished_at: DateTime<Utc> },
}

/// Follow a run: its backlog first, then new events as they arrive.
///
/// The backlog is the source of truth; the delivery queue only wakes the
/// observer up, and `seq` keeps each event from being sent twice. A quiet
/// interval of `poll` yields a heartbeat. The stream ends with `Done` once
/// the run is finished and drained, or silently if the run is reclaimed.
pub fn stream_run(
    registry: Arc<RunRegistry>,
    run_id: RunId,
    poll: Duration,
) -> impl Stream<Item = StreamFrame> {
    stream! {
        let mut next_seq = 0u64;
        let mut first = true;

        loop {
            let Some(progress) = registry.events_since(run_id, next_seq) else {
                if first {
                    yield StreamFrame::NotFound;
                }
                break;
            };
            first = false;

            for event in progress.events {
                next_seq = event.seq + 1;
                yield StreamFrame::Log(event);
            }
            if let Some(finished_at) = progress.finished_at {
                yield StreamFrame::Done { finished_at };
                break;
            }

            if registry.pop_next(run_id, poll).await.is_none() && registry.contains(run_id) {
                yield StreamFrame::Heartbeat { at: Utc::now() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use uuid::Uuid;

    fn registry() -> Arc<RunRegistry> {
        Arc::new(RunRegistry::new(Duration::from_secs(60), 16))
    }

    fn messages(frames: &[StreamFrame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Log(e) => Some(e.message.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn unknown_run() {
        let frames: Vec<_> = stream_run(registry(), Uuid::new_v4(), Duration::from_millis(10))
            .collect()
            .await;
        assert_eq!(frames, vec![StreamFrame::NotFound]);
    }

    #[tokio::test]
    async fn finished_run_replays_backlog_then_done() {
        let runs = registry();
        let run = runs.create("workflow");
        runs.append(run.run_id, RunEvent::info("one"));
        runs.append(run.run_id, RunEvent::info("two"));
        runs.finish(run.run_id);

        let frames: Vec<_> = stream_run(runs, run.run_id, Duration::from_millis(10))
            .collect()
            .await;
        assert_eq!(messages(&frames), vec!["one", "two"]);
        assert!(matches!(frames.last(), Some(StreamFrame::Done { .. })));
        assert_eq!(frames.len(), 3);
    }

    #[tokio::test]
    async fn live_tail_without_duplicates() {
        let runs = registry();
        let run = runs.create("workflow");
        runs.append(run.run_id, RunEvent::info("before"));

        let producer = {
            let runs = runs.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                runs.append(run.run_id, RunEvent::info("during"));
                tokio::time::sleep(Duration::from_millis(30)).await;
                runs.append(run.run_id, RunEvent::info("last"));
                runs.finish(run.run_id);
            })
        };

        let frames: Vec<_> = stream_run(runs, run.run_id, Duration::from_millis(10))
            .collect()
            .await;
        producer.await.unwrap();

        assert_eq!(messages(&frames), vec!["before", "during", "last"]);
        assert!(frames.iter().any(|f| matches!(f, StreamFrame::Heartbeat { .. })));
        assert!(matches!(frames.last(), Some(StreamFrame::Done { .. })));
    }

    #[tokio::test]
    async fn ends_when_run_is_reclaimed() {
        let runs = registry();
        let run = runs.create("workflow");
        let mut stream = Box::pin(stream_run(runs.clone(), run.run_id, Duration::from_millis(10)));

        assert!(matches!(stream.next().await, Some(StreamFrame::Heartbeat { .. })));
        runs.gc_at(run.started_at + chrono::TimeDelta::hours(1));
        while let Some(frame) = stream.next().await {
            assert!(matches!(frame, StreamFrame::Heartbeat { .. }));
        }
        assert!(runs.get(run.run_id).is_none());
    }

    #[test]
    fn frames_serialize_as_tagged_messages() {
        let json = serde_json::to_value(StreamFrame::NotFound).unwrap();
        assert_eq!(json["event"], "not_found");
    }
}
