//! Parser tests against fixture PDRs

mod common;

use common::fixture_text;
use pdr_common::checksum::ChecksumType;
use pdr_ingest::parser::parse_pdr;
use pdr_ingest::IngestError;

const DATA_DIR: &str = "/MODOPS/MODAPS/EDC/CUMULUS/FPROC/DATA";

#[test]
fn test_parse_single_collection_pdr() {
    let result = parse_pdr(&fixture_text("MOD09GQ.PDR"), "MOD09GQ.PDR").expect("Failed to parse PDR");

    assert_eq!(result.files_count, 2);
    assert_eq!(result.granules_count, 1);
    assert_eq!(result.granules.len(), 1);
    assert_eq!(result.total_size, 17_909_733);

    let granule = &result.granules[0];
    assert_eq!(granule.data_type, "MOD09GQ");
    assert_eq!(granule.data_version.as_deref(), Some("006"));
    assert!(granule.granule_id.is_empty());

    let hdf = granule
        .files
        .iter()
        .find(|f| f.name == "MOD09GQ.A2017224.h09v02.006.2017227165020.hdf")
        .unwrap();
    assert_eq!(hdf.path, DATA_DIR);
    assert_eq!(hdf.file_size, 17_865_615);
    assert_eq!(hdf.checksum_type, Some(ChecksumType::Cksum));
    assert_eq!(hdf.checksum_value.as_deref(), Some("4208254019"));

    let met = granule
        .files
        .iter()
        .find(|f| f.name == "MOD09GQ.A2017224.h09v02.006.2017227165020.hdf.met")
        .unwrap();
    assert_eq!(met.path, DATA_DIR);
    assert_eq!(met.file_size, 44_118);
    assert_eq!(met.checksum_type, None);
}

#[test]
fn test_parse_multi_data_type_pdr() {
    let result = parse_pdr(&fixture_text("multi-data-type.PDR"), "multi-data-type.PDR").unwrap();

    assert_eq!(result.files_count, 4);
    assert_eq!(result.granules_count, 2);
    assert_eq!(result.total_size, 35_819_466);
    assert_eq!(result.data_types(), vec!["MOD09GQ", "MOD87GQ"]);

    for granule in &result.granules {
        assert_eq!(granule.granule_size, 17_909_733);
        assert_eq!(granule.files.len(), 2);
    }

    let mod87 = result.granules.iter().find(|g| g.data_type == "MOD87GQ").unwrap();
    assert!(mod87.files.iter().all(|f| f.name.starts_with("PENS-MOD87GQ")));
}

#[test]
fn test_counters_match_granules() {
    for fixture in ["MOD09GQ.PDR", "multi-data-type.PDR"] {
        let result = parse_pdr(&fixture_text(fixture), fixture).unwrap();

        let files: usize = result.granules.iter().map(|g| g.files.len()).sum();
        let size: u64 = result
            .granules
            .iter()
            .flat_map(|g| g.files.iter())
            .map(|f| f.file_size)
            .sum();

        assert_eq!(result.files_count, files, "{}", fixture);
        assert_eq!(result.total_size, size, "{}", fixture);
        assert_eq!(result.granules_count, result.granules.len(), "{}", fixture);
    }
}

#[test]
fn test_unsupported_checksum_rejected() {
    let err = parse_pdr(&fixture_text("bad-checksum.PDR"), "bad-checksum.PDR").unwrap_err();

    match err {
        IngestError::ManifestFormat { manifest, reason } => {
            assert_eq!(manifest, "bad-checksum.PDR");
            assert!(reason.contains("unsupported checksum type"), "{}", reason);
        },
        other => panic!("expected ManifestFormat, got {:?}", other),
    }
}

#[test]
fn test_truncated_pdr_rejected() {
    let text = fixture_text("MOD09GQ.PDR");
    let cut = text.find("END_OBJECT = FILE_GROUP").unwrap();

    let err = parse_pdr(&text[..cut], "MOD09GQ.PDR").unwrap_err();
    assert!(err.to_string().contains("unterminated OBJECT = FILE_GROUP"), "{}", err);
}
