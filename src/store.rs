use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use rusoto_s3::{
    DeleteObjectRequest, ListObjectsV2Request, PutObjectRequest, S3Client, StreamingBody, S3,
};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::errors::StoreError;

pub mod mock;

/// What deleting everything under a prefix achieved.
#[derive(Debug, Default)]
pub struct TreeDeletion {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, StoreError)>,
}

/// The blob store holding listing photos.
pub trait Store: Send + Sync {
    /// Saves the given data under the given key, returning its public
    /// URL.
    fn save(&self, key: &str, content_type: String, raw: Bytes) -> BoxFuture<Result<Url, StoreError>>;

    /// Deletes every object whose key starts with `prefix`. Fails with
    /// `NotFound` if there are none.
    fn delete_tree(&self, prefix: &str) -> BoxFuture<Result<TreeDeletion, StoreError>>;

    /// Gets the public URL for the given key.
    fn get_url(&self, key: &str) -> Result<Url, StoreError>;
}

/// Builds a unique object key under `base` for an uploaded file, keeping
/// the file's extension when it has one.
///
/// ```
/// use homebase::store::build_storage_path;
/// let path = build_storage_path("owners/u1/listings/l1/", "front.PNG");
/// assert!(path.starts_with("owners/u1/listings/l1/"));
/// assert!(path.ends_with(".png"));
/// ```
pub fn build_storage_path(base: &str, file_name: &str) -> String {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.trim().to_lowercase())
        .filter(|extension| {
            !extension.is_empty() && extension.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "jpg".to_owned());

    format!(
        "{}/{}-{}.{}",
        base.trim_end_matches('/'),
        OffsetDateTime::now_utc().unix_timestamp(),
        Uuid::new_v4(),
        extension
    )
}

/// A store that saves its data to S3.
pub struct S3Store {
    client: Arc<S3Client>,
    acl: String,
    bucket: String,
    cache_control: String,
    base_url: Url,
}

impl S3Store {
    /// Creates a new instance.
    pub fn new(
        client: Arc<S3Client>,
        acl: String,
        bucket: String,
        cache_control: String,
        base_url: Url,
    ) -> Self {
        Self {
            client,
            acl,
            bucket,
            cache_control,
            base_url,
        }
    }

    pub fn from_env() -> Result<Self, rusoto_core::request::TlsError> {
        use rusoto_core::request::HttpClient;
        use rusoto_core::Region;
        use rusoto_credential::StaticProvider;

        use crate::config::get_variable;

        let access_key = get_variable("S3_ACCESS_KEY");
        let secret_access_key = get_variable("S3_SECRET_ACCESS_KEY");

        let region = Region::Custom {
            name: get_variable("S3_REGION_NAME"),
            endpoint: get_variable("S3_ENDPOINT"),
        };

        let bucket = get_variable("S3_BUCKET_NAME");
        let acl = get_variable("HOMEBASE_S3_ACL");
        let cache_control = get_variable("HOMEBASE_S3_CACHE_CONTROL");

        let client = Arc::new(S3Client::new_with(
            HttpClient::new()?,
            StaticProvider::new_minimal(access_key, secret_access_key),
            region,
        ));

        let base_url = Url::parse(&get_variable("S3_BASE_URL")).expect("parse S3_BASE_URL");

        Ok(S3Store::new(client, acl, bucket, cache_control, base_url))
    }
}

impl Store for S3Store {
    fn save(&self, key: &str, content_type: String, raw: Bytes) -> BoxFuture<Result<Url, StoreError>> {
        upload(self, key.to_owned(), content_type, raw).boxed()
    }

    fn delete_tree(&self, prefix: &str) -> BoxFuture<Result<TreeDeletion, StoreError>> {
        delete_tree(self, prefix.to_owned()).boxed()
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

async fn list_keys(store: &S3Store, prefix: &str) -> Result<Vec<String>, StoreError> {
    let mut keys = Vec::new();
    let mut continuation_token = None;

    loop {
        let request = ListObjectsV2Request {
            bucket: store.bucket.clone(),
            prefix: Some(prefix.to_owned()),
            continuation_token: continuation_token.take(),
            ..Default::default()
        };

        let output = store
            .client
            .list_objects_v2(request)
            .await
            .map_err(|source| StoreError::ListFailed { source })?;

        keys.extend(
            output
                .contents
                .unwrap_or_default()
                .into_iter()
                .filter_map(|object| object.key),
        );

        match output.next_continuation_token {
            Some(token) if output.is_truncated == Some(true) => continuation_token = Some(token),
            _ => break,
        }
    }

    Ok(keys)
}

async fn delete_tree(store: &S3Store, prefix: String) -> Result<TreeDeletion, StoreError> {
    let prefix = format!("{}/", prefix.trim_end_matches('/'));
    let keys = list_keys(store, &prefix).await?;

    if keys.is_empty() {
        return Err(StoreError::NotFound { path: prefix });
    }

    let mut deletion = TreeDeletion::default();

    for key in keys {
        let request = DeleteObjectRequest {
            bucket: store.bucket.clone(),
            key: key.clone(),
            ..Default::default()
        };

        match store.client.delete_object(request).await {
            Ok(_) => deletion.deleted.push(key),
            Err(source) => {
                let error = StoreError::DeleteFailed {
                    key: key.clone(),
                    source,
                };
                deletion.failed.push((key, error));
            }
        }
    }

    Ok(deletion)
}

async fn upload(store: &S3Store, key: String, content_type: String, raw: Bytes) -> Result<Url, StoreError> {
    use std::convert::TryFrom;

    let len = i64::try_from(raw.len()).expect("raw data length must be within range of i64");
    let url = store.get_url(&key)?;

    let request = PutObjectRequest {
        acl: Some(store.acl.clone()),
        body: Some(StreamingBody::from(raw.to_vec())),
        bucket: store.bucket.clone(),
        cache_control: Some(store.cache_control.clone()),
        content_length: Some(len),
        content_type: Some(content_type),
        key,
        ..Default::default()
    };

    let result = store.client.put_object(request).await;

    match result {
        Ok(_) => Ok(url),
        Err(e) => Err(StoreError::UploadFailed { source: e }),
    }
}
