//! Sequential uploader
//!
//! Computes the root digest locally, submits the bytes in a single call and
//! checks that the network stored exactly what was sent.

use crate::network::StorageNetwork;
use bytes::Bytes;
use cyxshare_core::{
    compute_layout, ChunkLayout, CyxShareError, LayoutParams, MerkleTree, Result, RootDigest,
    Stage,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Proof of a confirmed upload
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub root: RootDigest,
    pub transaction_ref: Option<String>,
    pub layout: ChunkLayout,
}

impl UploadReceipt {
    pub fn byte_length(&self) -> u64 {
        self.layout.byte_length()
    }

    pub fn segment_count(&self) -> u64 {
        self.layout.segment_count()
    }
}

/// Uploads files to a storage network
pub struct Uploader {
    network: Arc<dyn StorageNetwork>,
    params: LayoutParams,
}

impl Uploader {
    pub fn new(network: Arc<dyn StorageNetwork>, params: LayoutParams) -> Self {
        Self { network, params }
    }

    /// Upload without cancellation
    pub async fn upload(&self, data: Bytes) -> Result<UploadReceipt> {
        self.upload_with_cancel(data, &CancellationToken::new())
            .await
    }

    /// Upload `data` (already encrypted if encryption was requested).
    ///
    /// The root is computed before any network call. Cancelling before the
    /// submission completes leaves nothing for the caller to publish.
    #[instrument(skip(self, data, cancel), fields(size = data.len()))]
    pub async fn upload_with_cancel(
        &self,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt> {
        let layout = compute_layout(data.len() as u64, &self.params);
        let root = MerkleTree::from_data(&data, &self.params).root();

        debug!(
            root = %root,
            chunks = layout.chunk_count(),
            segments = layout.segment_count(),
            "Computed root digest"
        );

        let submission = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CyxShareError::Cancelled { stage: Stage::Submit });
            }
            submission = self.network.submit_file(data) => submission?,
        };

        if submission.root != root {
            error!(
                expected = %root,
                actual = %submission.root,
                "Network confirmed a different root than was computed locally"
            );
            return Err(CyxShareError::Integrity {
                expected: root,
                actual: submission.root,
            });
        }

        info!(
            root = %root,
            transaction = ?submission.transaction_ref,
            bytes = layout.byte_length(),
            "Upload confirmed"
        );

        Ok(UploadReceipt {
            root,
            transaction_ref: submission.transaction_ref,
            layout,
        })
    }
}
