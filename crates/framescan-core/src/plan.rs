use crate::types::{VideoMetadata, WorkItem};

/// Split every video into contiguous fixed-size frame ranges, in video index
/// order. The final item of a video may be short. The output depends only on
/// the metadata list and `frames_per_item`, so every node regenerates an
/// identical plan locally and the dispatcher only has to transmit indices.
pub fn plan_work_items(metadata: &[VideoMetadata], frames_per_item: usize) -> Vec<WorkItem> {
    let item_len = u32::try_from(frames_per_item).unwrap_or(u32::MAX).max(1);

    let mut items = Vec::new();
    for (video_index, meta) in metadata.iter().enumerate() {
        let mut allocated: u32 = 0;
        while allocated < meta.frames {
            let take = item_len.min(meta.frames - allocated);
            items.push(WorkItem {
                video_index,
                start_frame: allocated,
                end_frame: allocated + take,
            });
            allocated += take;
        }
    }
    items
}
