/*
    FluxFox FDC
    https://github.com/dbalsom/fluxfox

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/
mod common;

use common::*;
use fluxfox_fdc::{DataRate, DiskChsn, MemoryDrive};

const DEADLINE: f64 = 4.0;

#[test]
fn read_single_sector() {
    init();
    let mut bench = bench_with_formatted_disk(9);
    bench.dma_expect(512);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 1, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0], 0x00, "ST0 normal termination");
    assert_eq!(result[1], 0x00, "ST1 clear");
    assert_eq!(result[2], 0x00, "ST2 clear");
    assert_eq!(&result[3..7], &[0, 0, 2, 2], "R incremented past the read sector");
    assert_eq!(bench.dma_buffer, sector_payload(1, 512));
}

#[test]
fn read_multi_sector() {
    init();
    let mut bench = bench_with_formatted_disk(9);
    bench.dma_expect(1024);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 3, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0], 0x00);
    assert_eq!(&result[3..7], &[0, 0, 5, 2]);
    assert_eq!(&bench.dma_buffer[..512], &sector_payload(3, 512)[..]);
    assert_eq!(&bench.dma_buffer[512..], &sector_payload(4, 512)[..]);
}

#[test]
fn end_of_track_without_tc_flags_en() {
    init();
    let mut bench = bench_with_formatted_disk(9);
    // The DMA wants two sectors but the track ends after one: the sector
    // register wraps to 1, the cylinder must NOT advance, and the command
    // terminates abnormally with end-of-cylinder.
    bench.dma_expect(1024);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 9, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x40, "abnormal termination");
    assert_ne!(result[1] & 0x80, 0, "ST1 end-of-cylinder");
    assert_eq!(&result[3..7], &[0, 0, 1, 2], "R wrapped to 1, C unchanged");
    assert_eq!(&bench.dma_buffer[..512], &sector_payload(9, 512)[..]);
}

#[test]
fn end_of_track_with_tc_advances_cylinder() {
    init();
    let mut bench = bench_with_formatted_disk(9);
    // Terminal count at the final byte of the EOT sector confirms the intent
    // to continue: the result reports C+1, R=1.
    bench.dma_expect(512);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 9, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0], 0x00);
    assert_eq!(&result[3..7], &[1, 0, 1, 2]);
}

#[test]
fn multi_track_flips_head_before_cylinder() {
    init();
    let mut bench = bench_with_formatted_disk(9);
    // Give head 1 a formatted track as well.
    {
        let mut drive = bench.drive.borrow_mut();
        let cells = drive.cells_per_track();
        let sectors: Vec<SectorSpec> = (1..=9)
            .map(|s| SectorSpec::new(DiskChsn::new(0, 1, s, 2), sector_payload(0x40 + s, 512)))
            .collect();
        drive.load_track(0, 1, build_mfm_track(&sectors, cells));
    }
    // MT read of sector 9 head 0: continues at sector 1 head 1 on the same
    // cylinder instead of advancing C.
    bench.dma_expect(1024);
    let result = bench.run_command(&[0xC6, 0x00, 0, 0, 9, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00, "normal termination");
    assert_eq!(&result[3..7], &[0, 1, 2, 2], "head flipped, cylinder kept");
    assert_eq!(&bench.dma_buffer[..512], &sector_payload(9, 512)[..]);
    assert_eq!(&bench.dma_buffer[512..], &sector_payload(0x41, 512)[..]);
}

#[test]
fn sector_not_found_after_two_revolutions() {
    init();
    let mut bench = bench_with_formatted_disk(4);
    bench.dma_expect(512);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 8, 2, 8, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x40, "abnormal termination");
    assert_ne!(result[1] & 0x04, 0, "ST1 no-data");
    assert!(bench.dma_buffer.is_empty());
}

#[test]
fn header_with_wrong_cylinder_sets_wc() {
    init();
    let mut bench = bench_with_formatted_disk(4);
    // Request C=5 on a track whose headers record C=0.
    bench.dma_expect(512);
    let result = bench.run_command(&[0x46, 0x00, 5, 0, 1, 2, 4, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x40);
    assert_ne!(result[2] & 0x10, 0, "ST2 wrong cylinder");
}

#[test]
fn data_crc_error_reported() {
    init();
    let mut drive = MemoryDrive::with_media(80, DataRate::Rate250Kbps);
    let cells = drive.cells_per_track();
    let mut sectors = vec![
        SectorSpec::new(DiskChsn::new(0, 0, 1, 2), sector_payload(1, 512)),
        SectorSpec::new(DiskChsn::new(0, 0, 2, 2), sector_payload(2, 512)),
    ];
    sectors[1].corrupt_data_crc = true;
    drive.load_track(0, 0, build_mfm_track(&sectors, cells));
    let mut bench = TestBench::new(drive);
    bench.power_on();
    bench.dma_expect(512);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 2, 2, 2, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x40, "abnormal termination");
    assert_ne!(result[1] & 0x20, 0, "ST1 data error");
    assert_ne!(result[2] & 0x20, 0, "ST2 data error in data field");
}

#[test]
fn deleted_mark_sets_control_mark() {
    init();
    let mut drive = MemoryDrive::with_media(80, DataRate::Rate250Kbps);
    let cells = drive.cells_per_track();
    let mut sectors = vec![SectorSpec::new(DiskChsn::new(0, 0, 1, 2), sector_payload(9, 512))];
    sectors[0].deleted = true;
    drive.load_track(0, 0, build_mfm_track(&sectors, cells));
    let mut bench = TestBench::new(drive);
    bench.power_on();
    // Read Data (not Deleted) without SK: the sector is still transferred
    // but the control mark is reported and the command stops there.
    bench.dma_expect(512);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 1, 2, 1, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00, "normal termination");
    assert_ne!(result[2] & 0x40, 0, "ST2 control mark");
    assert_eq!(bench.dma_buffer, sector_payload(9, 512));
}

#[test]
fn write_protect_is_an_immediate_abnormal_result() {
    init();
    let mut drive = MemoryDrive::with_media(80, DataRate::Rate250Kbps);
    drive.set_write_protected(true);
    let mut bench = TestBench::new(drive);
    bench.power_on();
    bench.dma_supply(&[0u8; 512]);
    let result = bench.run_command(&[0x45, 0x00, 0, 0, 1, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x40, "abnormal termination");
    assert_ne!(result[1] & 0x02, 0, "ST1 not writable");
}

#[test]
fn fifo_overrun_forces_terminal_count() {
    init();
    let mut bench = bench_with_formatted_disk(9);
    // Never service the DMA: the 16-byte FIFO overruns, the transfer is cut
    // off with an internal TC, and the command completes abnormally.
    bench.dma_expect(512);
    bench.dma_paused = true;
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 1, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x40, "abnormal termination");
    assert_ne!(result[1] & 0x10, 0, "ST1 overrun");
}

#[test]
fn format_write_read_round_trip() {
    init();
    let mut bench = TestBench::new(MemoryDrive::with_media(80, DataRate::Rate250Kbps));
    bench.power_on();

    // Format Track: 9 sectors of 512 bytes, filler 0xE5; the DMA supplies
    // each sector's C/H/R/N quad.
    let mut ids = Vec::new();
    for s in 1..=9u8 {
        ids.extend_from_slice(&[0, 0, s, 2]);
    }
    bench.dma_supply(&ids);
    let result = bench.run_command(&[0x4D, 0x00, 2, 9, 0x54, 0xE5], DEADLINE);
    assert_eq!(result.len(), 7);
    assert_eq!(result[0] & 0xC0, 0x00, "format terminated normally");
    assert_eq!(result[1], 0x00);

    // Read ID sees one of the freshly formatted headers.
    let result = bench.run_command(&[0x4A, 0x00], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00);
    assert_eq!(result[3], 0, "C");
    assert_eq!(result[4], 0, "H");
    assert!((1..=9).contains(&result[5]), "R within the formatted range");
    assert_eq!(result[6], 2, "N");

    // Freshly formatted sectors read back as filler bytes.
    bench.dma_expect(512);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 3, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00);
    assert!(bench.dma_buffer.iter().all(|b| *b == 0xE5));

    // Write Data over sector 5, then read it back bit-for-bit.
    let payload = sector_payload(0x77, 512);
    bench.dma_supply(&payload);
    let result = bench.run_command(&[0x45, 0x00, 0, 0, 5, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00, "write terminated normally");
    assert_eq!(&result[3..7], &[0, 0, 6, 2]);

    bench.dma_expect(512);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 5, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00, "read-back terminated normally");
    assert_eq!(result[1], 0x00, "no CRC error on the rewritten sector");
    assert_eq!(bench.dma_buffer, payload);

    // The neighboring sector survived the splice.
    bench.dma_expect(512);
    let result = bench.run_command(&[0x46, 0x00, 0, 0, 6, 2, 9, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00);
    assert!(bench.dma_buffer.iter().all(|b| *b == 0xE5));
}

#[test]
fn read_track_transfers_sectors_in_physical_order() {
    init();
    let mut bench = bench_with_formatted_disk(4);
    bench.dma_expect(2048);
    let result = bench.run_command(&[0x42, 0x00, 0, 0, 1, 2, 4, 0x2A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00);
    assert_eq!(bench.dma_buffer.len(), 2048);
    for s in 1..=4u8 {
        let off = (s as usize - 1) * 512;
        assert_eq!(&bench.dma_buffer[off..off + 512], &sector_payload(s, 512)[..]);
    }
}

#[test]
fn scan_equal_hit() {
    init();
    let mut bench = bench_with_formatted_disk(2);
    bench.dma_supply(&sector_payload(1, 512));
    let result = bench.run_command(&[0x51, 0x00, 0, 0, 1, 2, 2, 0x2A, 0x01], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00, "normal termination");
    assert_ne!(result[2] & 0x08, 0, "ST2 scan equal hit");
    assert_eq!(result[2] & 0x04, 0, "not unsatisfied");
}

#[test]
fn scan_not_satisfied_at_eot() {
    init();
    let mut bench = bench_with_formatted_disk(2);
    let mut pattern = sector_payload(1, 512);
    pattern[7] ^= 0xFF;
    bench.dma_supply(&pattern);
    let result = bench.run_command(&[0x51, 0x00, 0, 0, 1, 2, 1, 0x2A, 0x01], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00);
    assert_ne!(result[2] & 0x04, 0, "ST2 scan not satisfied");
    assert_eq!(result[2] & 0x08, 0, "no equal hit");
}

#[test]
fn scan_wildcard_byte_matches_anything() {
    init();
    let mut bench = bench_with_formatted_disk(2);
    let mut pattern = sector_payload(1, 512);
    // 0xFF from the processor side matches any disk byte.
    pattern[100] = 0xFF;
    pattern[101] = 0xFF;
    bench.dma_supply(&pattern);
    let result = bench.run_command(&[0x51, 0x00, 0, 0, 1, 2, 2, 0x2A, 0x01], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00);
    assert_ne!(result[2] & 0x08, 0, "ST2 scan equal hit");
}

#[test]
fn fm_format_write_read_round_trip() {
    init();
    let mut bench = TestBench::new(MemoryDrive::with_media(80, DataRate::Rate250Kbps));
    bench.power_on();

    // Single-density format: 4 sectors of 256 bytes (opcodes without the
    // MFM bit).
    let mut ids = Vec::new();
    for s in 1..=4u8 {
        ids.extend_from_slice(&[0, 0, s, 1]);
    }
    bench.dma_supply(&ids);
    let result = bench.run_command(&[0x0D, 0x00, 1, 4, 0x1A, 0xD6], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00, "FM format terminated normally");

    let payload = sector_payload(0x21, 256);
    bench.dma_supply(&payload);
    let result = bench.run_command(&[0x05, 0x00, 0, 0, 2, 1, 4, 0x1A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00, "FM write terminated normally");

    bench.dma_expect(256);
    let result = bench.run_command(&[0x06, 0x00, 0, 0, 2, 1, 4, 0x1A, 0xFF], DEADLINE);
    assert_eq!(result[0] & 0xC0, 0x00, "FM read terminated normally");
    assert_eq!(result[1], 0x00);
    assert_eq!(bench.dma_buffer, payload);
}
