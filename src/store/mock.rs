use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, RwLock};

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use url::Url;

use crate::errors::StoreError;
use crate::store::{Store, TreeDeletion};

/// A store that keeps everything in memory.
pub struct MockStore {
    pub map: RwLock<BTreeMap<String, (String, Bytes)>>,
    base_url: Url,
    stuck: Mutex<HashSet<String>>,
}

impl MockStore {
    pub fn new(base_url: &str) -> Self {
        MockStore {
            map: RwLock::default(),
            base_url: Url::parse(base_url).expect("parse mock base URL"),
            stuck: Mutex::default(),
        }
    }

    /// Makes deleting `key` fail from now on.
    pub fn stick(&self, key: impl Into<String>) {
        self.stuck.lock().unwrap().insert(key.into());
    }

    pub fn keys(&self) -> Vec<String> {
        self.map.read().unwrap().keys().cloned().collect()
    }
}

impl Store for MockStore {
    fn save(&self, key: &str, content_type: String, raw: Bytes) -> BoxFuture<Result<Url, StoreError>> {
        let result = self.get_url(key).map(|url| {
            self.map
                .write()
                .unwrap()
                .insert(key.to_owned(), (content_type, raw));

            url
        });

        future::ready(result).boxed()
    }

    fn delete_tree(&self, prefix: &str) -> BoxFuture<Result<TreeDeletion, StoreError>> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let stuck = self.stuck.lock().unwrap();
        let mut map = self.map.write().unwrap();

        let keys: Vec<String> = map
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();

        let result = if keys.is_empty() {
            Err(StoreError::NotFound { path: prefix })
        } else {
            let mut deletion = TreeDeletion::default();

            for key in keys {
                if stuck.contains(&key) {
                    let error = StoreError::NotFound { path: key.clone() };
                    deletion.failed.push((key, error));
                } else {
                    map.remove(&key);
                    deletion.deleted.push(key);
                }
            }

            Ok(deletion)
        };

        future::ready(result).boxed()
    }

    fn get_url(&self, key: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(key)
            .map_err(|source| StoreError::FailedToGenerateUrl {
                key: key.to_owned(),
                source,
            })
    }
}
