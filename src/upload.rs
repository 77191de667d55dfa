use crate::error::AnalyzerError;
use image::ImageFormat;

/// A file as chosen by the user, before any decoding.
#[derive(Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Decodes the upload into a [`ReceiptImage`].
    ///
    /// Only JPEG and PNG are accepted; the format is sniffed from the content, not taken
    /// from the file name.
    pub fn decode(&self) -> Result<ReceiptImage, AnalyzerError> {
        let format = image::guess_format(&self.bytes)?;
        let mime_type = match format {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            other => {
                return Err(AnalyzerError::UnsupportedImageFormat(format!("{other:?}")));
            }
        };

        let decoded = image::load_from_memory_with_format(&self.bytes, format)?;
        log::debug!(
            "Decoded {} as {} ({}x{})",
            self.file_name,
            mime_type,
            decoded.width(),
            decoded.height()
        );

        Ok(ReceiptImage {
            mime_type,
            width: decoded.width(),
            height: decoded.height(),
            data: self.bytes.clone(),
        })
    }
}

impl std::fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A successfully decoded receipt, ready to be sent inline with a prompt.
#[derive(Clone, Debug)]
pub struct ReceiptImage {
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    /// Encoded bytes in `mime_type`.
    pub data: Vec<u8>,
}
