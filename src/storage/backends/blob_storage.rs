use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

use crate::storage::ObjectStore;

/// An S3 compatible bucket.
pub struct BlobStorageBackend {
    bucket: Box<Bucket>,
}

impl BlobStorageBackend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        region: String,
        endpoint: String,
        access_key: Option<&str>,
        secret_key: Option<&str>,
        security_token: Option<&str>,
        session_token: Option<&str>,
        path_style: bool,
    ) -> Result<Self> {
        let creds = Credentials::new(access_key, secret_key, security_token, session_token, None)?;
        let region = Region::Custom { region, endpoint };
        let mut bucket = Bucket::new(&name, region, creds)?;

        if path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self { bucket })
    }

    #[inline]
    fn format_path(&self, key: &str) -> String {
        format!("/{}", key)
    }
}

#[inline]
fn is_missing(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(404, _))
}

#[async_trait]
impl ObjectStore for BlobStorageBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let store_in = self.format_path(key);

        debug!("Storing blob in bucket @ {}", &store_in);
        let resp = self.bucket.put_object(&store_in, &data).await?;

        let code = resp.status_code();
        if code != 200 {
            Err(anyhow!("Remote storage bucket did not respond correctly, expected status 200 got {}", code))
        } else {
            Ok(())
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let store_in = self.format_path(key);

        debug!("Retrieving blob in bucket @ {}", &store_in);
        let resp = match self.bucket.get_object(&store_in).await {
            Ok(resp) => resp,
            Err(ref e) if is_missing(e) => return Ok(None),
            Err(other) => return Err(other.into()),
        };

        match resp.status_code() {
            200 => Ok(Some(Bytes::copy_from_slice(resp.as_slice()))),
            404 => Ok(None),
            code => Err(anyhow!("Remote storage bucket did not respond correctly, expected status 200 got {}", code)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let store_in = self.format_path(key);

        match self.bucket.head_object(&store_in).await {
            Ok((_, 200)) => Ok(true),
            Ok((_, 404)) => Ok(false),
            Ok((_, code)) => Err(anyhow!("Remote storage bucket did not respond correctly, expected status 200 got {}", code)),
            Err(ref e) if is_missing(e) => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let store_in = self.format_path(key);

        debug!("Purging blob in bucket @ {}", &store_in);
        let code = match self.bucket.delete_object(&store_in).await {
            Ok(resp) => resp.status_code(),
            Err(ref e) if is_missing(e) => return Ok(()),
            Err(other) => return Err(other.into()),
        };

        if code != 200 && code != 204 && code != 404 {
            return Err(anyhow!(
                "Remote storage bucket did not respond correctly, \
                expected status 204 got {}", code
            ))
        }

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let pages = self.bucket.list(prefix.to_string(), None).await?;

        let mut keys: Vec<String> = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| object.key)
            .collect();

        keys.sort();
        Ok(keys)
    }
}
