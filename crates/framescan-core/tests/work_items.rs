use framescan_core::plan::plan_work_items;
use framescan_core::types::{PixelFormat, VideoMetadata};

fn meta(frames: u32) -> VideoMetadata {
    VideoMetadata {
        width: 8,
        height: 8,
        frames,
        pixel_format: PixelFormat::Nv12,
    }
}

#[test]
fn items_cover_each_video_exactly_once() {
    let metadata = vec![meta(10), meta(7), meta(4)];
    let items = plan_work_items(&metadata, 4);

    for (video_index, m) in metadata.iter().enumerate() {
        let mut covered = vec![false; m.frames as usize];
        for item in items.iter().filter(|i| i.video_index == video_index) {
            for frame in item.start_frame..item.end_frame {
                let slot = &mut covered[frame as usize];
                assert!(!*slot, "frame {frame} of video {video_index} covered twice");
                *slot = true;
            }
        }
        assert!(
            covered.iter().all(|c| *c),
            "video {video_index} not fully covered"
        );
    }
}

#[test]
fn items_never_exceed_the_item_size() {
    let items = plan_work_items(&[meta(1000)], 256);
    assert!(items.iter().all(|i| i.len() <= 256));
    assert_eq!(items.len(), 4);
}

#[test]
fn planning_is_deterministic() {
    let metadata = vec![meta(123), meta(456)];
    let first = plan_work_items(&metadata, 64);
    let second = plan_work_items(&metadata, 64);
    assert_eq!(first, second);
}

#[test]
fn two_videos_split_into_expected_ranges() {
    let items = plan_work_items(&[meta(8), meta(6)], 4);
    assert_eq!(items.len(), 4);
    assert_eq!((items[0].start_frame, items[0].end_frame), (0, 4));
    assert_eq!((items[1].start_frame, items[1].end_frame), (4, 8));
    assert_eq!((items[2].start_frame, items[2].end_frame), (0, 4));
    assert_eq!((items[3].start_frame, items[3].end_frame), (4, 6));
    assert_eq!(items[2].video_index, 1);
}
