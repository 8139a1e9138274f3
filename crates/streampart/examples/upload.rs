//! Upload Example
//!
//! Decodes a multipart upload arriving in small network-sized chunks,
//! with checksums on every file part and a listener that collects a summary.
//!
//! Run with: RUST_LOG=streampart_core=debug cargo run --example upload -p streampart

use std::io::Read;

use streampart::prelude::*;
use streampart::{ChecksumSummary, ListenerError};
use tracing_subscriber::EnvFilter;

type Streams = ChecksumPartStreams<SpooledPartStreams>;

/// Collects what a request handler would typically persist.
#[derive(Default)]
struct UploadSummary {
    metadata: Option<serde_json::Value>,
    files: Vec<(String, ChecksumSummary)>,
    nested_depth: usize,
    finished: bool,
    failure: Option<String>,
}

impl MultipartListener<Streams> for UploadSummary {
    fn on_part_ready(&mut self, mut streams: Streams, headers: Headers) -> Result<(), ListenerError> {
        let part = PartHeaders::from_headers(&headers);
        // A real handler would copy to storage here; draining is enough to
        // compute the read-side digest.
        std::io::copy(&mut streams.source()?, &mut std::io::sink())?;
        let name = part.file_name().unwrap_or("unnamed").to_string();
        tracing::info!(file = %name, depth = self.nested_depth, "stored file");
        self.files.push((name, streams.summary()));
        Ok(())
    }

    fn on_form_field_part_ready(
        &mut self,
        field_name: String,
        value: String,
        _headers: Headers,
    ) -> Result<(), ListenerError> {
        if field_name == "metadata" {
            self.metadata = Some(serde_json::from_str(&value)?);
        }
        Ok(())
    }

    fn on_nested_part_started(&mut self, _headers: Headers) -> Result<(), ListenerError> {
        self.nested_depth += 1;
        Ok(())
    }

    fn on_nested_part_finished(&mut self) -> Result<(), ListenerError> {
        self.nested_depth -= 1;
        Ok(())
    }

    fn on_all_parts_finished(&mut self) -> Result<(), ListenerError> {
        self.finished = true;
        Ok(())
    }

    fn on_error(&mut self, message: &str, cause: &MultipartError) -> Result<(), ListenerError> {
        tracing::error!(kind = ?cause.kind(), "{message}");
        self.failure = Some(message.to_string());
        Ok(())
    }
}

fn request_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        b"--XYZ\r\n\
Content-Disposition: form-data; name=\"metadata\"\r\n\
Content-Type: application/json\r\n\r\n\
{\"owner\":\"demo\",\"k\":1}\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"hello.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
HELLO\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"attachments\"\r\n\
Content-Type: multipart/mixed; boundary=INNER\r\n\r\n\
--INNER\r\n\
Content-Disposition: attachment; filename=\"blob.bin\"\r\n\r\n",
    );
    body.extend((0..100_000u32).map(|i| (i % 256) as u8));
    body.extend_from_slice(b"\r\n--INNER--\r\n--XYZ--\r\n");
    body
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let body = request_body();
    let ctx = MultipartContext::new(
        "multipart/form-data; boundary=XYZ",
        Some(body.len() as u64),
        Some("UTF-8".to_string()),
    )?;
    let mut decoder = new_decoder(ctx, UploadSummary::default())
        .with_spool_threshold(Some(16 * 1024))
        .with_checksums()
        .build()?;

    // Simulate a socket delivering 1460-byte segments.
    let mut reader = body.as_slice();
    let mut segment = [0u8; 1460];
    loop {
        let n = reader.read(&mut segment)?;
        if n == 0 {
            break;
        }
        decoder.feed(&segment[..n])?;
    }
    decoder.close()?;

    let summary = decoder.into_listener();
    if let Some(failure) = &summary.failure {
        return Err(failure.clone().into());
    }

    println!("metadata: {}", summary.metadata.unwrap_or_default());
    for (name, checksum) in &summary.files {
        println!(
            "{name}: {} bytes, sha256 {} ({})",
            checksum.written_bytes,
            checksum.written_digest,
            if checksum.is_consistent() { "verified" } else { "MISMATCH" }
        );
    }
    println!("complete: {}", summary.finished);
    Ok(())
}
