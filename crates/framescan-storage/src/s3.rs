use std::future::Future;
use std::path::Path;

use aws_sdk_s3::primitives::AggregatedBytes;

use crate::{FileInfo, RandomReadFile, StorageBackend, StorageError};

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    pub fn from_env(bucket: String, prefix: String) -> Result<Self, StorageError> {
        let client = block_on(client_from_env())??;
        Ok(Self {
            client,
            bucket,
            prefix,
        })
    }

    fn key_for(&self, path: &Path) -> String {
        let rel = path.to_string_lossy();
        let rel = rel.trim_start_matches('/');
        if self.prefix.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{rel}", self.prefix.trim_end_matches('/'))
        }
    }

    fn head(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let out = block_on({
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = key.to_string();
            async move { client.head_object().bucket(bucket).key(key).send().await }
        })?;
        match out {
            Ok(head) => Ok(Some(head.content_length().unwrap_or(0).max(0) as u64)),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(StorageError::Runtime(format!("head_object failed: {err}")))
                }
            }
        }
    }
}

impl StorageBackend for S3Storage {
    fn open_random_read(&self, path: &Path) -> Result<Box<dyn RandomReadFile>, StorageError> {
        let key = self.key_for(path);
        let size = self
            .head(&key)?
            .ok_or_else(|| StorageError::NotFound(format!("s3://{}/{key}", self.bucket)))?;
        Ok(Box::new(S3File {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key,
            size,
        }))
    }

    fn get_file_info(&self, path: &Path) -> Result<FileInfo, StorageError> {
        let key = self.key_for(path);
        Ok(match self.head(&key)? {
            Some(size) => FileInfo { exists: true, size },
            None => FileInfo {
                exists: false,
                size: 0,
            },
        })
    }
}

struct S3File {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
    size: u64,
}

impl RandomReadFile for S3File {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if buf.is_empty() {
            return Ok(());
        }
        let len = buf.len() as u64;
        if offset.saturating_add(len) > self.size {
            return Err(StorageError::OutOfRange {
                path: format!("s3://{}/{}", self.bucket, self.key),
                offset,
                len,
                size: self.size,
            });
        }
        let end = offset + len - 1;
        let range = format!("bytes={offset}-{end}");

        let bytes: AggregatedBytes = block_on({
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = self.key.clone();
            async move {
                let out = client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .range(range)
                    .send()
                    .await
                    .map_err(|e| StorageError::Runtime(format!("get_object failed: {e}")))?;
                out.body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Runtime(format!("get_object body failed: {e:?}")))
            }
        })??;

        let got = bytes.into_bytes();
        if got.len() != buf.len() {
            return Err(StorageError::Runtime(format!(
                "s3 returned {} bytes, expected {} (s3://{}/{})",
                got.len(),
                buf.len(),
                self.bucket,
                self.key
            )));
        }
        buf.copy_from_slice(&got);
        Ok(())
    }
}

pub(crate) fn parse_bucket_prefix(rest: &str) -> Result<(String, String), StorageError> {
    let rest = rest.trim().trim_start_matches('/');
    let (bucket, prefix) = match rest.split_once('/') {
        Some((b, p)) => (b.trim(), p.trim().trim_end_matches('/')),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return Err(StorageError::UnsupportedRoot(format!("s3://{rest}")));
    }
    Ok((bucket.to_string(), prefix.to_string()))
}

async fn client_from_env() -> Result<aws_sdk_s3::Client, StorageError> {
    let cfg = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

    let endpoint_url: Option<String> = std::env::var("FRAMESCAN_S3_ENDPOINT_URL").ok();
    let force_path_style = endpoint_url.is_some();

    let mut b = aws_sdk_s3::config::Builder::from(&cfg);
    if let Some(url) = endpoint_url {
        b = b.endpoint_url(url);
    }
    if force_path_style {
        b = b.force_path_style(true);
    }
    Ok(aws_sdk_s3::Client::from_conf(b.build()))
}

fn block_on<Fut>(fut: Fut) -> Result<Fut::Output, StorageError>
where
    Fut: Future,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
        Err(_) => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| StorageError::Runtime(format!("tokio runtime init failed: {e}")))?;
            Ok(rt.block_on(fut))
        }
    }
}
