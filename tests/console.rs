use nfc_multitool::commands::Console;
use nfc_multitool::config::{Config, ReaderKind, SimulatedTagKind};
use nfc_multitool::nfc::{demo_tag, Modulation, SimTag, SimulatedReader};

const SOURCE_UID: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
const TARGET_UID: [u8; 4] = [0x01, 0x02, 0x03, 0x04];
const NTAG_UID: [u8; 7] = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

fn console_with(tag: Option<SimTag>) -> Console<SimulatedReader> {
    let mut reader = SimulatedReader::new();
    if let Some(tag) = tag {
        reader.insert(tag);
    }
    let config = Config {
        reader: ReaderKind::Simulated,
        ..Config::default()
    };
    Console::new(reader, config)
}

fn demo_classic() -> Console<SimulatedReader> {
    console_with(demo_tag(SimulatedTagKind::Classic1k).unwrap())
}

fn run(console: &mut Console<SimulatedReader>, line: &str) -> String {
    let mut out = Vec::new();
    console.execute(line, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

/// Output sink that refuses any line starting with `prefix`.
struct RefusingOut {
    prefix: &'static str,
}

impl std::io::Write for RefusingOut {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if buf.starts_with(self.prefix.as_bytes()) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn dump_rows(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter(|line| {
            line.get(..3)
                .is_some_and(|addr| addr.trim().parse::<u16>().is_ok())
        })
        .collect()
}

#[test]
fn scan_reports_and_remembers_the_tag() {
    let mut console = demo_classic();
    let output = run(&mut console, "SCAN");
    assert_eq!(
        output,
        "Place tag on reader...\n\
         Tag: MIFARE Classic 1K\n  \
         UID (4): DE:AD:BE:EF\n  \
         ATQA: 0x0004  SAK: 0x08\n"
    );
    assert_eq!(
        console.session().current_tag().map(|tag| tag.uid().to_vec()),
        Some(SOURCE_UID.to_vec())
    );
}

#[test]
fn scan_with_empty_field_keeps_previous_tag() {
    let mut console = demo_classic();
    run(&mut console, "SCAN");
    console.reader_mut().remove();
    let output = run(&mut console, "scan");
    assert!(output.ends_with("No tag found.\n"));
    assert!(console.session().current_tag().is_some());
}

#[test]
fn tag_commands_require_a_scan() {
    let mut console = demo_classic();
    for line in ["DUMP", "KEYS", "NDEF", "WRITE URL https://a.b", "CLONE READ"] {
        assert_eq!(run(&mut console, line), "No tag scanned. Run SCAN first.\n", "{line}");
    }
    assert_eq!(
        run(&mut console, "CLONE WRITE"),
        "Clone buffer empty. Run CLONE READ first.\n"
    );
    assert_eq!(console.reader().auth_calls(), 0);
}

#[test]
fn removed_tag_is_reported_not_present() {
    let mut console = demo_classic();
    run(&mut console, "SCAN");
    console.reader_mut().remove();
    assert_eq!(
        run(&mut console, "DUMP"),
        "Hold tag on reader for dump...\nTag not present.\n"
    );
}

#[test]
fn classic_dump_covers_every_block() {
    let mut console = demo_classic();
    run(&mut console, "SCAN");
    let output = run(&mut console, "DUMP");
    assert!(output.contains("--- MIFARE Classic Memory Dump ---"));
    let rows = dump_rows(&output);
    assert_eq!(rows.len(), 64);
    assert!(rows[0].starts_with("  0 | DE AD BE EF "));
    assert!(!output.contains("AUTH FAILED"));
}

#[test]
fn classic_dump_marks_locked_sector() {
    let mut tag = SimTag::classic_1k(&SOURCE_UID);
    tag.set_sector_keys(2, [0x12; 6], [0x34; 6]);
    let mut console = console_with(Some(tag));
    run(&mut console, "SCAN");
    let output = run(&mut console, "DUMP");
    let failed: Vec<_> = dump_rows(&output)
        .into_iter()
        .filter(|row| row.contains("AUTH FAILED"))
        .collect();
    assert_eq!(failed.len(), 4);
    assert!(failed[0].starts_with("  8 |"));
}

#[test]
fn ultralight_dump_lists_pages() {
    let mut console = console_with(Some(SimTag::ultralight(&NTAG_UID, 231)));
    run(&mut console, "SCAN");
    let output = run(&mut console, "DUMP");
    assert!(output.contains("--- Ultralight / NTAG Memory Dump ---"));
    assert!(output.contains("  3  | E1 10 6D 00 | ..m.\n"));
    assert_eq!(dump_rows(&output).len(), 231);
}

#[test]
fn key_audit_reports_both_key_slots() {
    let mut console = demo_classic();
    run(&mut console, "SCAN");
    let output = run(&mut console, "KEYS");
    assert!(output.contains(" 0   | FF:FF:FF:FF:FF:FF (A) | FF:FF:FF:FF:FF:FF (B)\n"));
    assert!(output.contains(" 1   | D3:F7:D3:F7:D3:F7 (A) | FF:FF:FF:FF:FF:FF (B)\n"));
    assert!(output.ends_with("Keys tested: 10 known keys x 2 (A+B) per sector\n"));
}

#[test]
fn key_audit_is_classic_only() {
    let mut console = console_with(Some(SimTag::ultralight(&NTAG_UID, 231)));
    run(&mut console, "SCAN");
    assert_eq!(
        run(&mut console, "KEYS"),
        "Key audit only applies to MIFARE Classic.\n"
    );
}

#[test]
fn ndef_decodes_classic_through_the_directory() {
    let mut console = demo_classic();
    run(&mut console, "SCAN");
    let output = run(&mut console, "NDEF");
    assert!(output.contains("Record #1\n  TNF: Well-known\n  Type: U\n"));
    assert!(output.contains("  URI: https://example.com/nfc\n"));
}

#[test]
fn ndef_without_directory_entry() {
    let mut console = console_with(Some(SimTag::classic_1k(&SOURCE_UID)));
    run(&mut console, "SCAN");
    let output = run(&mut console, "NDEF");
    assert!(output.ends_with("No NDEF application in MAD.\n"));
}

#[test]
fn ndef_on_unformatted_ntag_finds_no_message() {
    let mut tag = SimTag::ultralight(&NTAG_UID, 231);
    tag.set_page(4, [0; 4]);
    let mut console = console_with(Some(tag));
    run(&mut console, "SCAN");
    assert!(run(&mut console, "NDEF").ends_with("No NDEF message found.\n"));
}

#[test]
fn written_url_reads_back_from_ntag() {
    let mut console = console_with(Some(SimTag::ultralight(&NTAG_UID, 231)));
    run(&mut console, "SCAN");
    let output = run(&mut console, "WRITE URL https://www.Example.org/Path");
    assert!(output.ends_with("Written URL: https://www.Example.org/Path\n"));
    let output = run(&mut console, "NDEF");
    assert!(output.contains("  URI: https://www.Example.org/Path\n"));
}

#[test]
fn written_text_reads_back_from_classic() {
    let mut console = demo_classic();
    run(&mut console, "SCAN");
    let output = run(&mut console, "WRITE TEXT hello world");
    assert!(output.ends_with("Written Text to Classic sector 1: hello world\n"));
    let output = run(&mut console, "NDEF");
    assert!(output.contains("  Lang: en\n  Text: hello world\n"));
}

#[test]
fn oversize_write_touches_nothing() {
    let mut console = console_with(Some(SimTag::ultralight(&NTAG_UID, 231)));
    run(&mut console, "SCAN");
    let line = format!("WRITE URL https://{}", "a".repeat(300));
    let output = run(&mut console, &line);
    assert!(output.contains("exceeds the 255-byte limit"));
    assert!(console.reader().writes().is_empty());
}

#[test]
fn malformed_writes_print_usage() {
    let mut console = demo_classic();
    run(&mut console, "SCAN");
    assert_eq!(
        run(&mut console, "WRITE URL"),
        "Usage: WRITE URL <url>  or  WRITE TEXT <text>\n"
    );
    assert_eq!(
        run(&mut console, "WRITE VCARD bob"),
        "Unknown record type. Use URL or TEXT.\n"
    );
}

#[test]
fn classic_clone_copies_data_blocks_once() {
    let mut console = demo_classic();
    run(&mut console, "SCAN");
    let output = run(&mut console, "CLONE READ");
    assert!(output.contains("Read 64 blocks into clone buffer.\n"));
    assert!(output.contains("Source UID: DE:AD:BE:EF\n"));

    console.reader_mut().insert(SimTag::classic_1k(&TARGET_UID));
    let output = run(&mut console, "CLONE WRITE");
    assert!(output.contains("Target UID: 01:02:03:04\n"));
    assert!(output.ends_with("Cloned 47 data blocks to target.\n"));

    let target = console.reader().tag().unwrap();
    let source = demo_tag(SimulatedTagKind::Classic1k).unwrap().unwrap();
    assert_eq!(target.block(4), source.block(4));
    assert_eq!(target.block(1), source.block(1));
    assert_eq!(target.block(0).unwrap()[..4], TARGET_UID);

    assert_eq!(
        run(&mut console, "CLONE WRITE"),
        "Clone buffer empty. Run CLONE READ first.\n"
    );
}

#[test]
fn tag_leaving_during_clone_read_keeps_the_previous_buffer() {
    let mut console = demo_classic();
    run(&mut console, "SCAN");
    run(&mut console, "CLONE READ");
    let before = console.session().clone_buffer().unwrap().bytes().to_vec();

    console.reader_mut().remove_after_auths(5);
    let output = run(&mut console, "CLONE READ");
    assert!(output.starts_with("Hold SOURCE tag on reader...
"));
    assert!(output.ends_with("Tag not present.
"));
    assert!(!output.contains("into clone buffer"));
    assert_eq!(console.session().clone_buffer().unwrap().bytes(), &before[..]);
}

#[test]
fn unreadable_blocks_are_listed_by_ndef_and_clone_read() {
    let mut tag = demo_tag(SimulatedTagKind::Classic1k).unwrap().unwrap();
    tag.fail_reads(9);
    tag.fail_reads(5);
    let mut console = console_with(Some(tag));
    run(&mut console, "SCAN");

    let output = run(&mut console, "NDEF");
    assert!(output.contains("Read failed at block 5\n"));

    let output = run(&mut console, "CLONE READ");
    assert!(output.contains("Read failed at block 5 (zero-filled)\n"));
    assert!(output.contains("Read failed at block 9 (zero-filled)\n"));
    assert!(output.contains("Read 64 blocks into clone buffer.\n"));
    assert_eq!(console.session().clone_buffer().unwrap().bytes()[9 * 16..10 * 16], [0u8; 16]);
}

#[test]
fn clone_buffer_survives_missing_or_mismatched_target() {
    let mut console = console_with(Some(SimTag::ultralight(&NTAG_UID, 231)));
    run(&mut console, "SCAN");
    assert!(run(&mut console, "CLONE READ").contains("Read 231 pages into clone buffer.\n"));

    console.reader_mut().remove();
    assert!(run(&mut console, "CLONE WRITE").ends_with("No tag found.\n"));
    assert!(console.session().clone_buffer().is_some());

    console.reader_mut().insert(SimTag::classic_1k(&TARGET_UID));
    let output = run(&mut console, "CLONE WRITE");
    assert!(output.ends_with(
        "target tag is MIFARE Classic 1K but the clone buffer holds MIFARE Ultralight\n"
    ));
    assert!(console.session().clone_buffer().is_some());

    let mut target = SimTag::ultralight(&[0x04, 0, 0, 0, 0, 0, 0x01], 231);
    target.lock_pages_from(40);
    console.reader_mut().insert(target);
    let output = run(&mut console, "CLONE WRITE");
    assert!(output.contains("Write failed at page 40 (may be config/lock page)\n"));
    assert!(output.ends_with("Cloned 36 pages to target.\n"));
    assert!(console.session().clone_buffer().is_none());
}

#[test]
fn output_error_during_clone_write_keeps_an_unapplied_buffer() {
    let mut console = console_with(Some(SimTag::ultralight(&NTAG_UID, 231)));
    run(&mut console, "SCAN");
    run(&mut console, "CLONE READ");

    let mut out = RefusingOut { prefix: "Place" };
    assert!(console.execute("CLONE WRITE", &mut out).is_err());
    assert!(console.session().clone_buffer().is_some());

    console.reader_mut().insert(SimTag::classic_1k(&TARGET_UID));
    let mut out = RefusingOut { prefix: "Target" };
    assert!(console.execute("CLONE WRITE", &mut out).is_err());
    assert!(console.session().clone_buffer().is_some());
    assert_eq!(console.reader().tag().unwrap().block(4), Some([0u8; 16]));
}

#[test]
fn scan_all_polls_each_protocol() {
    let mut console = demo_classic();
    console
        .reader_mut()
        .add_target(Modulation::Iso14443B, &[0x11, 0x22, 0x33, 0x44]);
    let output = run(&mut console, "SCANALL");
    assert!(output.contains("[ISO 14443A]\n  Found: MIFARE Classic 1K\n  UID: DE:AD:BE:EF\n"));
    assert!(output.contains("[ISO 14443B]\n  Found ISO 14443B! ID: 11:22:33:44\n"));
    assert!(output.contains("[FeliCa (212 kbps)]\n  No FeliCa tag found.\n"));
    assert!(console.session().current_tag().is_some());
}

#[test]
fn help_and_unknown_commands() {
    let mut console = demo_classic();
    let help = run(&mut console, "help");
    assert!(help.contains("  CLONE WRITE  - Write clone buffer to blank tag\n"));
    assert!(help.ends_with("No tag scanned yet.\n"));
    assert_eq!(
        run(&mut console, "format"),
        "Unknown command: format\nType HELP for available commands.\n"
    );
    assert_eq!(run(&mut console, ""), "");
}
