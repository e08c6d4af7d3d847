#![no_main]
use bufalloc_core::{AllocatorConfig, LogLevel, Stack};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let align = 1usize << (data[0] % 7);
    let config = AllocatorConfig::default()
        .with_align(align)
        .with_log_level(LogLevel::Error);
    let mut buf = vec![0u8; 8 * 1024];
    let mut stack = Stack::with_config(&mut buf, &config);
    let mut offsets = Vec::new();

    for chunk in data[1..].chunks_exact(3) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize % 1024;
        match chunk[0] % 3 {
            0 | 1 => {
                let before = stack.curr_offset();
                if stack.alloc(size).is_ok() {
                    offsets.push(before);
                } else {
                    assert_eq!(stack.curr_offset(), before);
                }
            }
            _ => {
                let popped = stack.pop().expect("pop");
                let expected = offsets.pop();
                assert_eq!(popped, expected.is_some());
                if let Some(before) = expected {
                    assert_eq!(stack.curr_offset(), before);
                }
            }
        }
        assert_eq!(stack.depth(), offsets.len());
    }
});
