//! Corrective jobs pushed by remediators.
//!
//! Both fan out into one [`ElasticaWrite`](crate::ElasticaWrite) per target
//! cluster, so a frozen or failing cluster never holds back the others.
//! Running either twice is harmless.

use sanity_types::{
    DeletePagesParams, ElasticaWriteParams, IndexDocument, Job, LinksUpdateParams, WriteOperation,
};
use tracing::{debug, instrument};

use crate::context::JobContext;
use crate::error::JobError;

/// Push `operation` as one write job per target cluster.
fn fan_out(
    ctx: &JobContext,
    cluster: Option<&str>,
    operation: WriteOperation,
) -> Result<usize, JobError> {
    let connections = ctx
        .clusters
        .decide_clusters(cluster, &ctx.selection_for(&operation))?;
    let now = ctx.clock.now();
    for name in connections.keys() {
        let params = ElasticaWriteParams::new(operation.clone(), name.clone(), now);
        let id = ctx.queue.push(Job::ElasticaWrite(params), None)?;
        debug!(id, cluster = %name, method = operation.method(), "queued write");
    }
    Ok(connections.len())
}

/// Re-index one page from the canonical store.
#[derive(Debug, Clone)]
pub struct LinksUpdate {
    params: LinksUpdateParams,
}

impl LinksUpdate {
    /// Job for `params`.
    pub fn new(params: LinksUpdateParams) -> Self {
        Self { params }
    }

    /// Build the document for the page and queue a write per cluster.
    ///
    /// A page that vanished, turned into a redirect or carries an invalid
    /// title is deleted from every index instead. Returns the number of
    /// writes queued.
    #[instrument(skip_all, fields(page_id = self.params.page_id, cluster = ?self.params.cluster))]
    pub async fn run(&self, ctx: &JobContext) -> Result<usize, JobError> {
        let params = &self.params;
        let doc_id = ctx.index_config.make_id(params.page_id);
        let page = ctx
            .pages
            .get_pages(&[params.page_id])
            .await?
            .into_iter()
            .next()
            .filter(|page| !page.is_redirect);

        let operation = match page.and_then(|page| page.title().map(|title| (page, title))) {
            Some((page, title)) => {
                let suffix = ctx.index_config.index_suffix_for_namespace(page.namespace);
                WriteOperation::SendData {
                    index_suffix: suffix.to_string(),
                    documents: vec![IndexDocument {
                        doc_id,
                        namespace: page.namespace,
                        title: title.text,
                        version: Some(page.latest_revision_id),
                        // The cluster rewrites this to its live index name.
                        index: ctx.index_config.index_name(suffix, 0),
                    }],
                }
            }
            None => {
                debug!("page gone or not indexable, deleting instead");
                WriteOperation::SendDeletes {
                    doc_ids: vec![doc_id],
                    index_suffix: None,
                }
            }
        };
        fan_out(ctx, params.cluster.as_deref(), operation)
    }
}

/// Delete one document.
#[derive(Debug, Clone)]
pub struct DeletePages {
    params: DeletePagesParams,
}

impl DeletePages {
    /// Job for `params`.
    pub fn new(params: DeletePagesParams) -> Self {
        Self { params }
    }

    /// Queue a delete per cluster, restricted to `index_suffix` when set.
    /// Returns the number of writes queued.
    #[instrument(skip_all, fields(doc_id = %self.params.doc_id, cluster = ?self.params.cluster))]
    pub async fn run(&self, ctx: &JobContext) -> Result<usize, JobError> {
        let params = &self.params;
        debug!(title = %params.title, index_suffix = ?params.index_suffix, "deleting document");
        fan_out(
            ctx,
            params.cluster.as_deref(),
            WriteOperation::SendDeletes {
                doc_ids: vec![params.doc_id.clone()],
                index_suffix: params.index_suffix.clone(),
            },
        )
    }
}
