use std::collections::HashMap;
use std::convert::Infallible;

use bytes::Bytes;
use futures::executor::block_on;
use futures::stream;

use crate::core::errors::ApiError;

/// A fully buffered `multipart/form-data` body.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
}

impl FormData {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// First non-empty file among `names`.
    pub fn file(&self, names: &[&str]) -> Option<&[u8]> {
        names
            .iter()
            .filter_map(|name| self.files.get(*name))
            .find(|data| !data.is_empty())
            .map(Vec::as_slice)
    }
}

pub fn is_multipart(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// Parses a buffered multipart body. Parts carrying a filename are kept as
/// raw bytes, everything else as text.
pub fn parse_multipart(content_type: &str, body: &[u8]) -> Result<FormData, ApiError> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|_| ApiError::validation("Invalid multipart boundary"))?;

    let chunk = Bytes::copy_from_slice(body);
    let body_stream = stream::once(async move { Ok::<Bytes, Infallible>(chunk) });
    let mut multipart = multer::Multipart::new(body_stream, boundary);

    block_on(async {
        let mut form = FormData::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                let data = field.bytes().await.map_err(malformed)?;
                form.files.insert(name, data.to_vec());
            } else {
                let text = field.text().await.map_err(malformed)?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    })
}

fn malformed(err: multer::Error) -> ApiError {
    tracing::debug!(error = %err, "rejecting malformed multipart body");
    ApiError::validation("Malformed form data")
}
