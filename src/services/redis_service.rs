// src/services/redis_service.rs
use crate::errors::HailError;
use crate::models::*;
use log::debug;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Snapshots live for the same 24 hours as a results view session.
const RECORD_TTL_SECS: usize = 86400;

/// Watched play-head writes give up after this many conflicting commits.
const PLAYHEAD_UPDATE_ATTEMPTS: usize = 16;

pub struct RedisService {
    client: Client,
}

fn image_key(id: &Uuid) -> String {
    format!("inspection:image:{}", id)
}

fn video_key(id: &Uuid) -> String {
    format!("inspection:video:{}", id)
}

fn playhead_key(id: &Uuid) -> String {
    format!("inspection:video:{}:playhead", id)
}

impl RedisService {
    pub async fn new(redis_url: &str) -> Result<Self, HailError> {
        let client = Client::open(redis_url).map_err(|e| HailError::Redis(e.to_string()))?;

        // Test connection
        let mut conn = client
            .get_async_connection()
            .await
            .map_err(|e| HailError::Redis(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| HailError::Redis(e.to_string()))?;

        Ok(Self { client })
    }

    async fn put<T: Serialize>(&self, key: &str, record: &T) -> Result<(), HailError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| HailError::Redis(e.to_string()))?;

        let value =
            serde_json::to_string(record).map_err(|e| HailError::Serialization(e.to_string()))?;

        conn.set_ex::<_, _, ()>(key, value, RECORD_TTL_SECS)
            .await
            .map_err(|e| HailError::Redis(e.to_string()))
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, HailError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| HailError::Redis(e.to_string()))?;

        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| HailError::Redis(e.to_string()))?;

        value
            .map(|v| serde_json::from_str(&v).map_err(|e| HailError::Serialization(e.to_string())))
            .transpose()
    }

    pub async fn store_image_inspection(&self, inspection: &ImageInspection) -> Result<(), HailError> {
        self.put(&image_key(&inspection.id), inspection).await
    }

    pub async fn get_image_inspection(&self, id: &Uuid) -> Result<ImageInspection, HailError> {
        self.fetch(&image_key(id))
            .await?
            .ok_or_else(|| HailError::NotFound(format!("image inspection {}", id)))
    }

    pub async fn store_video_inspection(&self, inspection: &VideoInspection) -> Result<(), HailError> {
        self.put(&video_key(&inspection.id), inspection).await?;
        self.store_playhead(&inspection.id, &Playhead::default()).await
    }

    pub async fn get_video_inspection(&self, id: &Uuid) -> Result<VideoInspection, HailError> {
        self.fetch(&video_key(id))
            .await?
            .ok_or_else(|| HailError::NotFound(format!("video inspection {}", id)))
    }

    pub async fn store_playhead(&self, id: &Uuid, playhead: &Playhead) -> Result<(), HailError> {
        self.put(&playhead_key(id), playhead).await
    }

    /// Missing play-heads start at the beginning, paused.
    pub async fn get_playhead(&self, id: &Uuid) -> Result<Playhead, HailError> {
        Ok(self.fetch(&playhead_key(id)).await?.unwrap_or_default())
    }

    /// Read-modify-write of a play-head under `WATCH`. `update` sees the
    /// stored play-head and returns the replacement (or `None` to leave it
    /// as is) plus a result for the caller. A commit that loses the race to
    /// another writer is retried against the fresh value.
    pub async fn update_playhead<F, R>(&self, id: &Uuid, mut update: F) -> Result<R, HailError>
    where
        F: FnMut(Playhead) -> (Option<Playhead>, R),
    {
        let key = playhead_key(id);
        // WATCH state is per connection, so this one is not shared
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| HailError::Redis(e.to_string()))?;

        for attempt in 1..=PLAYHEAD_UPDATE_ATTEMPTS {
            redis::cmd("WATCH")
                .arg(&key)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| HailError::Redis(e.to_string()))?;

            let stored: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| HailError::Redis(e.to_string()))?;
            let current = stored
                .map(|v| {
                    serde_json::from_str(&v).map_err(|e| HailError::Serialization(e.to_string()))
                })
                .transpose()?
                .unwrap_or_default();

            let (replacement, outcome) = update(current);
            let Some(replacement) = replacement else {
                redis::cmd("UNWATCH")
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| HailError::Redis(e.to_string()))?;
                return Ok(outcome);
            };

            let value = serde_json::to_string(&replacement)
                .map_err(|e| HailError::Serialization(e.to_string()))?;
            // EXEC replies nil when the watched key changed
            let committed: Option<()> = redis::pipe()
                .atomic()
                .set_ex(&key, value, RECORD_TTL_SECS)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| HailError::Redis(e.to_string()))?;
            if committed.is_some() {
                return Ok(outcome);
            }
            debug!("Play-head {} changed during update, retrying (attempt {})", id, attempt);
        }

        Err(HailError::Redis(format!(
            "play-head {} kept changing, gave up after {} attempts",
            id, PLAYHEAD_UPDATE_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_kind() {
        let id = Uuid::nil();
        assert_eq!(
            image_key(&id),
            "inspection:image:00000000-0000-0000-0000-000000000000"
        );
        assert_ne!(image_key(&id), video_key(&id));
        assert!(playhead_key(&id).starts_with(&video_key(&id)));
    }

    // needs a running Redis at REDIS_URL (default redis://127.0.0.1:6379)
    #[tokio::test]
    #[ignore]
    async fn concurrent_playhead_updates_are_not_lost() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let service = std::sync::Arc::new(RedisService::new(&url).await.unwrap());
        let id = Uuid::new_v4();
        service.store_playhead(&id, &Playhead::default()).await.unwrap();

        let tasks = (0..10)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .update_playhead(&id, |mut playhead| {
                            playhead.current_timestamp += 1.0;
                            (Some(playhead), ())
                        })
                        .await
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let playhead = service.get_playhead(&id).await.unwrap();
        assert_eq!(playhead.current_timestamp, 10.0);
    }
}
