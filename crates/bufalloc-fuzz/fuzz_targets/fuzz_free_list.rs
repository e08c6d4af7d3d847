#![no_main]
use bufalloc_core::{AllocError, AllocatorConfig, FreeList, LogLevel, Placement};
use libfuzzer_sys::fuzz_target;

// Each 4-byte chunk is one operation: op, size (u16 LE), selector.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let align = 8usize << (data[0] % 4);
    let config = AllocatorConfig::default()
        .with_align(align)
        .with_log_level(LogLevel::Error);
    let mut buf = vec![0u8; 16 * 1024];
    let Ok(mut list) = FreeList::with_config(&mut buf[(data[1] % 16) as usize..], &config) else {
        return;
    };
    let mut live: Vec<(usize, usize)> = Vec::new();

    for chunk in data[2..].chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize % 4096;
        let pick = chunk[3] as usize;
        match chunk[0] % 4 {
            0 | 1 => {
                let placement = if chunk[0] & 0x80 == 0 {
                    Placement::FirstFit
                } else {
                    Placement::BestFit
                };
                match list.alloc(size, placement) {
                    Ok(offset) => live.push((offset, size)),
                    Err(AllocError::Exhausted { .. }) => {}
                    Err(err) => panic!("unexpected alloc failure: {err}"),
                }
            }
            2 => {
                if !live.is_empty() {
                    let (offset, size) = live.swap_remove(pick % live.len());
                    list.free(offset, size).expect("free of a live block");
                }
            }
            _ => {
                // Frees of anything but a live payload must be rejected.
                if live.iter().all(|&(offset, _)| offset != size) {
                    assert!(list.free(size, pick).is_err());
                }
            }
        }
        list.check_consistency().expect("layout invariants");
    }

    for (offset, size) in live {
        list.free(offset, size).expect("final free");
    }
    assert_eq!(list.blocks().len(), 1);
});
