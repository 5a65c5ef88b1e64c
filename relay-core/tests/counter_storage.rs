use relay_core::storage::{
    CounterStore, MemoryStorage, SlotWidth, StorageDevice, StorageError, StorageFault,
};

#[test]
fn mixed_allocations_never_overlap() {
    let mut store = CounterStore::new(MemoryStorage::<16, 8>::new());
    let widths = [
        SlotWidth::U8,
        SlotWidth::U32,
        SlotWidth::U16,
        SlotWidth::U8,
        SlotWidth::U16,
        SlotWidth::U32,
        SlotWidth::U8,
    ];

    let mut slots = Vec::new();
    for width in widths {
        let slot = store.allocate(width).expect("region has room");
        assert_eq!(
            slot.offset % width.bytes(),
            0,
            "{width:?} slot at {} is misaligned",
            slot.offset
        );
        slots.push(slot);
    }

    for (index, a) in slots.iter().enumerate() {
        for b in &slots[index + 1..] {
            let a_range = a.offset..a.offset + a.width.bytes();
            let b_range = b.offset..b.offset + b.width.bytes();
            assert!(
                a_range.end <= b_range.start || b_range.end <= a_range.start,
                "{a_range:?} overlaps {b_range:?}"
            );
        }
    }
}

#[test]
fn byte_write_preserves_live_neighbours_in_the_unit() {
    let mut store = CounterStore::new(MemoryStorage::<8, 8>::new());
    let first = store.allocate(SlotWidth::U8).expect("slot");
    let half = store.allocate(SlotWidth::U16).expect("slot");
    let word = store.allocate(SlotWidth::U32).expect("slot");
    let second = store.allocate(SlotWidth::U8).expect("slot");

    store.write(first, 0x11).expect("write");
    store.write(half, 0x2233).expect("write");
    store.write(word, 0x4455_6677).expect("write");

    store.write(second, 0x99).expect("write");
    store.write(first, 0x12).expect("rewrite");

    assert_eq!(store.read(first), Ok(0x12));
    assert_eq!(store.read(second), Ok(0x99));
    assert_eq!(store.read(half), Ok(0x2233));
    assert_eq!(store.read(word), Ok(0x4455_6677));
}

#[test]
fn program_failure_is_reported_without_retry() {
    let mut store = CounterStore::new(MemoryStorage::<8, 8>::new());
    store.device_mut().inject(StorageFault::Program);

    assert_eq!(store.write_u16(0, 7), Err(StorageError::ProgramFailed));
    assert_eq!(store.device().erase_count(), 1);
    assert_eq!(store.device().program_count(), 0);

    let mut raw = [0u8; 2];
    store.device_mut().read(0, &mut raw).expect("read");
    assert_eq!(raw, [0xFF, 0xFF], "unit stays erased after a failed program");
}
