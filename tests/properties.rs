use nfc_multitool::error::NfcError;
use nfc_multitool::nfc::ndef::{self, RecordContent, TextBody, MAX_MESSAGE_LEN};
use nfc_multitool::nfc::sector;
use nfc_multitool::nfc::TagType;
use proptest::prelude::*;

proptest! {
    #[test]
    fn every_block_lies_inside_its_sector(block in 0u16..256) {
        let first = sector::sector_first_block(block);
        let last = sector::sector_last_block(block);
        prop_assert!(first <= block && block <= last);
        prop_assert_eq!(last - first + 1, sector::group_size(block));
        prop_assert_eq!(sector::first_block_of_sector(sector::sector_of_block(block)), first);
        prop_assert_eq!(sector::is_sector_trailer(block), block == last);
        prop_assert_eq!(sector::sector_first_block(first), first);
    }

    #[test]
    fn uri_prefix_code_and_tail_survive_encoding(code in 0u8..36, tail in "[ -~]{0,247}") {
        let message = ndef::build_uri_record(code, &tail).unwrap();
        let scan = ndef::parse_tlv_stream(&message);
        prop_assert_eq!(scan.records.len(), 1);
        match scan.records[0].content() {
            RecordContent::Uri { prefix_code, tail: decoded, .. } => {
                prop_assert_eq!(prefix_code, code);
                prop_assert_eq!(decoded, tail);
            }
            other => prop_assert!(false, "decoded as {:?}", other),
        }
    }

    #[test]
    fn uri_records_decode_to_their_input(tail in "[a-z0-9./-]{0,200}") {
        let uri = format!("https://{tail}");
        let (prefix_code, rest) = ndef::split_uri_prefix(&uri);
        let message = ndef::build_uri_record(prefix_code, rest).unwrap();
        prop_assert!(message.len() <= MAX_MESSAGE_LEN);
        let scan = ndef::parse_tlv_stream(&message);
        prop_assert!(scan.found);
        prop_assert!(scan.issues.is_empty());
        prop_assert_eq!(scan.records.len(), 1);
        prop_assert_eq!(scan.records[0].content().uri(), Some(uri));
    }

    #[test]
    fn text_records_decode_to_their_input(
        language in "[a-z]{2}(-[A-Z]{2})?",
        text in "\\PC{0,60}",
    ) {
        let message = ndef::build_text_record(&language, &text).unwrap();
        let scan = ndef::parse_tlv_stream(&message);
        prop_assert_eq!(scan.records.len(), 1);
        prop_assert_eq!(
            scan.records[0].content(),
            RecordContent::Text {
                language,
                body: TextBody::Utf8(text),
            }
        );
    }

    #[test]
    fn oversize_payloads_are_refused(extra in 1usize..64) {
        let tail = "x".repeat(ndef::MAX_PAYLOAD_LEN + extra);
        let refused = matches!(
            ndef::build_uri_record(0, &tail),
            Err(NfcError::OversizeInput { max: MAX_MESSAGE_LEN, .. })
        );
        prop_assert!(refused);
    }

    #[test]
    fn tlv_scan_accepts_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let scan = ndef::parse_tlv_stream(&bytes);
        for tlv in &scan.tlvs {
            prop_assert!(tlv.value_offset + tlv.value_length <= bytes.len());
        }
        for record in &scan.records {
            let _ = record.content();
        }
    }
}

#[test]
fn classic_geometry_totals() {
    assert_eq!(sector::total_blocks(TagType::Classic1K), 64);
    assert_eq!(sector::sector_count(TagType::Classic1K), 16);
    assert_eq!(sector::total_blocks(TagType::Classic4K), 256);
    assert_eq!(sector::sector_count(TagType::Classic4K), 40);
    let blocks: u16 = sector::sectors(TagType::Classic4K)
        .map(|descriptor| descriptor.block_count)
        .sum();
    assert_eq!(blocks, 256);
}
