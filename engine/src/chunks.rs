//! Chunked result reassembly.
//!
//! `results_meta` announces a result set, each `results_chunk` appends its
//! rows in arrival order, and `results_complete` closes the set. Rows are
//! never deduplicated or reordered by `chunkIndex`; the transport's in-order
//! delivery is trusted. Count disagreements are logged, never corrected.

use fieldhand_types::{ChunkProgress, Message, ResultsChunk, ResultsComplete, ResultsMeta};

pub(crate) fn on_meta(message: &mut Message, meta: &ResultsMeta) {
    if message
        .data()
        .is_some_and(|bundle| !bundle.is_empty())
    {
        tracing::debug!("Result announcement resets accumulated rows");
    }
    message.clear_data();

    let status = message.status_mut();
    status.chunks = Some(ChunkProgress::announced(meta.total_items, meta.total_chunks));
    status.current_message = meta.message.clone().unwrap_or_else(|| match meta.total_items {
        Some(total) => format!("Receiving {total} results"),
        None => "Receiving results".to_string(),
    });

    tracing::debug!(
        total_items = ?meta.total_items,
        total_chunks = ?meta.total_chunks,
        chunk_size = ?meta.chunk_size,
        "Result set announced"
    );
}

pub(crate) fn on_chunk(message: &mut Message, chunk: &ResultsChunk) {
    let progress = message.status_mut().chunks.get_or_insert_with(|| {
        tracing::warn!("Result chunk arrived without an announcement");
        ChunkProgress::default()
    });
    if progress.finished {
        tracing::warn!(
            chunk_index = ?chunk.chunk_index,
            "Discarding result chunk after results_complete"
        );
        return;
    }

    if let Some(index) = chunk.chunk_index
        && index != progress.received_chunks
    {
        tracing::warn!(
            chunk_index = index,
            expected = progress.received_chunks,
            "Result chunk out of sequence; appending in arrival order"
        );
    }

    progress.received_chunks = progress.received_chunks.saturating_add(1);
    progress.received_items = progress.received_items.saturating_add(chunk.data.len());
    if chunk.progress.is_some() {
        progress.progress = chunk.progress;
    }
    if progress.total_chunks.is_none() {
        progress.total_chunks = chunk.total_chunks;
    }
    if progress.total_items.is_none() {
        progress.total_items = chunk.total_items;
    }
    let line = progress_line(progress);

    message.status_mut().current_message = line;
    message.data_mut().result.extend(chunk.data.iter().cloned());
}

pub(crate) fn on_complete(message: &mut Message, done: &ResultsComplete) {
    let progress = message
        .status_mut()
        .chunks
        .get_or_insert_with(ChunkProgress::default);
    if progress.finished {
        tracing::warn!("Duplicate results_complete ignored");
        return;
    }
    progress.finished = true;

    if let Some((expected, received)) = progress.item_mismatch() {
        tracing::warn!(expected, received, "Result row count differs from announcement");
    }
    if let Some(total) = done.total_items
        && total != progress.received_items
    {
        tracing::warn!(
            expected = total,
            received = progress.received_items,
            "Result row count differs from completion"
        );
    }
    if let Some(total) = progress.total_chunks
        && total != progress.received_chunks
    {
        tracing::warn!(
            expected = total,
            received = progress.received_chunks,
            "Result chunk count differs from announcement"
        );
    }
    let received = progress.received_items;

    message.status_mut().current_message = done
        .message
        .clone()
        .unwrap_or_else(|| format!("Received {received} results"));
    if let Some(summary) = &done.summary {
        message.data_mut().summary = Some(summary.clone());
    }
}

fn progress_line(progress: &ChunkProgress) -> String {
    match (progress.total_chunks, progress.progress) {
        (_, Some(pct)) => format!("Receiving results ({pct:.0}%)"),
        (Some(total), None) => format!(
            "Receiving results ({}/{total})",
            progress.received_chunks
        ),
        (None, None) => format!("Receiving results ({} rows)", progress.received_items),
    }
}
