use leak_analysis_track::{
    global, track_delete, track_delete_array, track_new, track_new_array, Tracker, TrackerConfig,
};

struct Node {
    value: u64,
    label: String,
}

fn test(tracker: &Tracker) -> usize {
    let mut total = 0;
    for value in 0..22 {
        let node = track_new!(tracker, Node {
            value,
            label: format!("node {}", value),
        });
        unsafe {
            let current = &*node;
            total += current.label.len() + current.value as usize;
            track_delete!(tracker, node);
        }
    }
    total
}

fn leak_some(tracker: &Tracker) {
    let _buffer = track_new_array!(tracker, 0u8; 64);
    let _node = track_new!(tracker, Node {
        value: 1,
        label: String::new(),
    });
}

fn main() {
    pretty_env_logger::init();

    // LEAK_TRACE_FILE / LEAK_TRACE_DUMP choose the outputs, the report is written at exit.
    let tracker = match global::install(TrackerConfig::from_env()) {
        Ok(tracker) => tracker,
        Err(err) => {
            log::error!("{}", err);
            return;
        }
    };

    let v = track_new_array!(tracker, 1u32; 3);
    println!("Hello, world! {:?}", unsafe { &*v });
    unsafe { track_delete_array!(tracker, v) };
    println!("test: {}", test(&tracker));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tracker = tracker.clone();
            std::thread::spawn(move || test(&tracker))
        })
        .collect();
    for handle in handles {
        let _ = handle.join();
    }

    leak_some(&tracker);
}
