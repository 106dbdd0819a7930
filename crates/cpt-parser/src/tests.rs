use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::errors::FormatError;
use crate::formats::{BroXmlParser, GefParser};
use crate::model::{Channel, DepthSource, PorePressurePosition, RecordState, SourceFormat};
use crate::registry::{parse_with_parsers, CptParser};
use crate::{parse_as, parse_cpt_file};

fn fixture(path: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_path = base.join("tests/data").join(path);
    fs::read_to_string(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err))
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

const MINIMAL_GEF: &str = "#GEFID= 1, 1, 0
#COLUMN= 5
#COLUMNINFO= 1, m, penetration length, 1
#COLUMNINFO= 2, MPa, cone resistance, 2
#COLUMNINFO= 3, MPa, local friction, 3
#COLUMNINFO= 4, MPa, pore pressure u2, 6
#COLUMNINFO= 5, deg, inclination, 8
#TESTID= MINI
#XYID= 31000, 1.0, 2.0
#ZID= 31000, 0.5
#EOH=
0.00 1.0 0.010 0.001 0.0
0.02 1.1 0.011 0.002 0.0
0.04 1.2 0.012 0.003 0.0
";

#[test]
fn parses_gef_sounding_with_header_metadata() {
    let content = fixture("DKP302.gef");
    let record = parse_cpt_file(&content).expect("GEF parse failed");

    assert_eq!(record.id, "DKP302");
    assert_eq!(record.source.format, SourceFormat::Gef);
    assert_eq!(record.state(), RecordState::Raw);
    assert_eq!(record.sample_count(), 20);
    assert_close(record.location.x, 108992.60);
    assert_close(record.location.y, 433448.20);
    assert_eq!(record.location.reference_system.as_deref(), Some("EPSG:28992"));
    assert_close(record.ground_level, 1.35);

    let metadata = &record.metadata;
    assert_eq!(metadata.vertical_datum.as_deref(), Some("NAP"));
    assert_eq!(metadata.cone_type.as_deref(), Some("CP15-CF75PB1SN2/1701-1524"));
    assert_eq!(
        metadata.cpt_standard.as_deref(),
        Some("NEN-EN-ISO 22476-1 klasse 2 TE2")
    );
    assert_eq!(metadata.cone_area_ratio, Some(0.80));
    assert_close(metadata.pre_drill_depth, 1.20);
    assert!(metadata.pre_drill_section.is_none());
    assert_eq!(
        metadata.started_at,
        NaiveDate::from_ymd_opt(2021, 2, 18).and_then(|d| d.and_hms_opt(10, 15, 30))
    );
    assert_eq!(
        metadata.source_units.get(&Channel::ConeResistance).map(String::as_str),
        Some("MPa")
    );
}

#[test]
fn gef_stress_columns_are_converted_to_kilopascal() {
    let record = parse_cpt_file(&fixture("DKP302.gef")).expect("GEF parse failed");
    let raw = &record.raw;

    assert_close(raw.penetration_length[0], 1.20);
    assert_close(raw.penetration_length[19], 3.10);
    let qc = raw.cone_resistance.as_ref().expect("cone resistance");
    assert_close(qc[0], 850.0);
    let fs = raw.sleeve_friction.as_ref().expect("sleeve friction");
    assert_close(fs[0], 12.0);
    let u2 = raw.pore_pressure(PorePressurePosition::U2).expect("u2");
    assert_close(u2[1], 12.0);
    assert!(raw.friction_ratio.is_none());
    assert_eq!(raw.measured_pore_pressures(), vec![PorePressurePosition::U2]);
    assert_eq!(raw.inclination.as_ref().map(Vec::len), Some(20));
}

#[test]
fn gef_void_rows_are_removed_and_inclination_resolved() {
    let record = parse_cpt_file(&fixture("void_rows.gef")).expect("GEF parse failed");
    let raw = &record.raw;

    assert_eq!(raw.penetration_length, vec![0.00, 0.02, 0.08, 0.10]);
    let rf = raw.friction_ratio.as_ref().expect("friction ratio");
    assert_eq!(rf, &vec![0.80, 0.85, 0.95, 1.00]);
    assert!(raw.sleeve_friction.is_none());
    assert!(raw.pore_pressure(PorePressurePosition::U1).is_some());

    let inclination = raw.inclination.as_ref().expect("resultant inclination");
    assert_close(inclination[1], 1.0);
    assert_close(inclination[2], 3.0);
    assert_close(inclination[3], 0.0);
    assert_close(record.ground_level, -2.10);
}

#[test]
fn gef_row_with_missing_value_reports_column_count() {
    let content = MINIMAL_GEF.replace("0.04 1.2 0.012 0.003 0.0", "0.04 1.2 0.012 0.003");
    match GefParser.parse(&content) {
        Err(FormatError::ColumnCount {
            row,
            expected,
            found,
            line,
            ..
        }) => {
            assert_eq!(row, 2);
            assert_eq!(expected, 5);
            assert_eq!(found, 4);
            assert_eq!(line, 14);
        }
        other => panic!("expected ColumnCount error, got {other:?}"),
    }
}

#[test]
fn gef_rejects_unparseable_value() {
    let content = MINIMAL_GEF.replace("0.02 1.1", "0.02 abc");
    match GefParser.parse(&content) {
        Err(FormatError::DataRow { row, message, .. }) => {
            assert_eq!(row, 1);
            assert!(message.contains("abc"));
        }
        other => panic!("expected DataRow error, got {other:?}"),
    }
}

#[test]
fn gef_without_end_of_header_is_missing_element() {
    let content = MINIMAL_GEF.replace("#EOH=\n", "");
    match GefParser.parse(&content) {
        Err(FormatError::MissingElement { element, .. }) => assert_eq!(element, "#EOH"),
        other => panic!("expected MissingElement error, got {other:?}"),
    }
}

#[test]
fn gef_without_penetration_length_column_fails() {
    let content = MINIMAL_GEF.replace(
        "#COLUMNINFO= 1, m, penetration length, 1",
        "#COLUMNINFO= 1, m, something else, 99",
    );
    match GefParser.parse(&content) {
        Err(FormatError::MissingElement { element, .. }) => {
            assert!(element.contains("quantity 1"));
        }
        other => panic!("expected MissingElement error, got {other:?}"),
    }
}

#[test]
fn gef_stress_column_in_length_unit_is_unit_mismatch() {
    let content = MINIMAL_GEF.replace("2, MPa, cone resistance", "2, m, cone resistance");
    match GefParser.parse(&content) {
        Err(FormatError::UnitMismatch {
            column, channel, ..
        }) => {
            assert_eq!(column, 2);
            assert_eq!(channel, Channel::ConeResistance);
        }
        other => panic!("expected UnitMismatch error, got {other:?}"),
    }
}

#[test]
fn gef_unknown_unit_falls_back_to_quantity_default() {
    let content = MINIMAL_GEF.replace("2, MPa, cone resistance", "2, bar?, cone resistance");
    let record = GefParser.parse(&content).expect("fallback unit");
    let qc = record.raw.cone_resistance.expect("cone resistance");
    assert_close(qc[0], 1000.0);
}

#[test]
fn gef_with_only_void_rows_is_empty() {
    let content = MINIMAL_GEF
        .replace("#TESTID", "#COLUMNVOID= 2, 1.0\n#COLUMNVOID= 1, 0.02\n#TESTID")
        .replace("0.04 1.2", "0.04 1.0");
    match GefParser.parse(&content) {
        Err(FormatError::EmptyData { parser }) => assert_eq!(parser, "GEF_CPT"),
        other => panic!("expected EmptyData error, got {other:?}"),
    }
}

#[test]
fn parses_bro_xml_with_pre_drill() {
    let content = fixture("CPT000000012345.xml");
    let record = parse_cpt_file(&content).expect("BRO XML parse failed");

    assert_eq!(record.id, "CPT000000012345");
    assert_eq!(record.source.format, SourceFormat::BroXml);
    assert_close(record.location.x, 155000.0);
    assert_close(record.location.y, 463000.0);
    assert_eq!(record.location.reference_system.as_deref(), Some("EPSG:28992"));
    assert_close(record.ground_level, -0.26);

    let metadata = &record.metadata;
    assert_eq!(metadata.vertical_datum.as_deref(), Some("NAP"));
    assert_eq!(metadata.local_reference.as_deref(), Some("maaiveld"));
    assert_eq!(metadata.quality_class.as_deref(), Some("klasse2"));
    assert_eq!(metadata.cpt_standard.as_deref(), Some("NEN5140"));
    assert_eq!(metadata.cone_area_ratio, Some(0.75));
    assert_eq!(
        metadata.started_at,
        NaiveDate::from_ymd_opt(2018, 6, 12).and_then(|d| d.and_hms_opt(9, 8, 5))
    );
    let section = metadata.pre_drill_section.as_ref().expect("pre-drill section");
    assert_close(section.depth, 1.0);
    assert_close(section.main_series_start, 1.0);
}

#[test]
fn bro_rows_are_sorted_deduplicated_and_filtered() {
    let record = parse_cpt_file(&fixture("CPT000000012345.xml")).expect("BRO XML parse failed");
    let raw = &record.raw;

    assert_eq!(raw.len(), 10);
    assert!(raw
        .penetration_length
        .windows(2)
        .all(|pair| pair[1] > pair[0]));
    assert_close(raw.penetration_length[9], 1.18);

    let qc = raw.cone_resistance.as_ref().expect("cone resistance");
    // first occurrence of the repeated penetration length wins
    assert_close(qc[5], 1000.0);
    assert_close(qc[0], 500.0);
    let fs = raw.sleeve_friction.as_ref().expect("local friction");
    assert_close(fs[0], 10.0);
    assert!(raw.measured_depth.is_some());
    assert!(raw.elapsed_time.is_some());
    assert_eq!(raw.inclination.as_ref().map(Vec::len), Some(10));
    assert_eq!(raw.measured_pore_pressures(), vec![PorePressurePosition::U2]);
}

#[test]
fn bro_without_trajectory_has_no_pre_drill() {
    let record = parse_as(SourceFormat::BroXml, &fixture("CPT000000067890.xml"))
        .expect("BRO XML parse failed");

    assert_eq!(record.sample_count(), 6);
    assert_close(record.metadata.pre_drill_depth, 0.0);
    assert!(record.metadata.pre_drill_section.is_none());
    assert!(record.raw.sleeve_friction.is_none());
    assert_eq!(
        record.raw.friction_ratio.as_ref().map(Vec::len),
        Some(6)
    );
    let u1 = record
        .raw
        .pore_pressure(PorePressurePosition::U1)
        .expect("u1");
    assert_close(u1[5], 10.0);
    assert_eq!(
        record.metadata.started_at,
        NaiveDate::from_ymd_opt(2020, 1, 30).and_then(|d| d.and_hms_opt(0, 0, 0))
    );
}

#[test]
fn bro_missing_cone_resistance_parameter_is_rejected() {
    let content = fixture("CPT000000067890.xml").replace(
        "<cptcommon:coneResistance>ja</cptcommon:coneResistance>",
        "<cptcommon:coneResistance>nee</cptcommon:coneResistance>",
    );
    match BroXmlParser.parse(&content) {
        Err(FormatError::MissingElement { element, .. }) => {
            assert!(element.contains("coneResistance"));
        }
        other => panic!("expected MissingElement error, got {other:?}"),
    }
}

#[test]
fn bro_short_value_row_reports_column_count() {
    let content = fixture("CPT000000067890.xml").replacen(
        "<cptcommon:values>0.00,",
        "<cptcommon:values>0.00,0.00,",
        1,
    );
    match BroXmlParser.parse(&content) {
        Err(FormatError::ColumnCount {
            row,
            expected,
            found,
            ..
        }) => {
            assert_eq!(row, 0);
            assert_eq!(expected, 25);
            assert_eq!(found, 26);
        }
        other => panic!("expected ColumnCount error, got {other:?}"),
    }
}

#[test]
fn malformed_xml_with_cpt_elements_is_xml_error() {
    let content = "<dispatchDataResponse><broId>CPT1</broId><conePenetrationTest>";
    match parse_cpt_file(content) {
        Err(FormatError::Xml { parser, .. }) => assert_eq!(parser, "BRO_XML"),
        other => panic!("expected Xml error, got {other:?}"),
    }
}

#[test]
fn unknown_content_reports_every_attempt() {
    match parse_cpt_file("timestamp,value\n2024-01-01,3\n") {
        Err(FormatError::NoMatchingParser { attempts }) => {
            let names: Vec<_> = attempts.iter().map(|attempt| attempt.parser).collect();
            assert_eq!(names, vec!["GEF_CPT", "BRO_XML"]);
        }
        other => panic!("expected NoMatchingParser error, got {other:?}"),
    }
}

#[test]
fn explicit_parser_list_skips_mismatches() {
    let parsers: [&dyn CptParser; 2] = [&BroXmlParser, &GefParser];
    let record = parse_with_parsers(MINIMAL_GEF, &parsers).expect("GEF via registry");
    assert_eq!(record.id, "MINI");
    assert_eq!(record.sample_count(), 3);
}

#[test]
fn raw_record_dataframe_lists_present_channels() {
    let record = GefParser.parse(MINIMAL_GEF).expect("GEF parse failed");
    let df = record.to_dataframe().expect("dataframe");
    assert_eq!(df.height(), 3);
    let names: Vec<&str> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "penetration_length_m",
            "cone_resistance_kpa",
            "sleeve_friction_kpa",
            "pore_pressure_u2_kpa",
            "inclination_deg",
        ]
    );
}

#[test]
fn record_serializes_to_json() {
    let record = parse_cpt_file(&fixture("DKP302.gef")).expect("GEF parse failed");
    let json = serde_json::to_value(&record).expect("serialize");
    assert_eq!(json["id"], "DKP302");
    assert_eq!(json["source"]["format"], "gef");
    assert_eq!(
        json["raw"]["penetration_length"].as_array().map(Vec::len),
        Some(20)
    );

    let restored: crate::CptRecord =
        serde_json::from_value(json).expect("deserialize");
    assert_eq!(restored.id, record.id);
    assert_eq!(restored.sample_count(), record.sample_count());
    assert!(!restored.is_processed());
}

#[test]
fn gef_separators_comments_and_column_order_are_honoured() {
    let record = parse_cpt_file(&fixture("reordered_columns.gef")).expect("GEF parse failed");
    let raw = &record.raw;

    assert_eq!(record.id, "REORD01");
    assert_eq!(record.sample_count(), 3);
    assert_eq!(raw.penetration_length, vec![0.50, 0.52, 0.54]);
    let qc = raw.cone_resistance.as_ref().expect("cone resistance");
    assert_close(qc[0], 1500.0);
    assert_close(qc[2], 2500.0);
    let fs = raw.sleeve_friction.as_ref().expect("sleeve friction");
    assert_close(fs[1], 20.0);
    let u2 = raw.pore_pressure(PorePressurePosition::U2).expect("u2");
    assert_close(u2[2], 6.0);
    assert!(raw.inclination.is_none());
    assert_close(record.ground_level, -0.40);
}

#[test]
fn gef_comment_and_blank_lines_do_not_count_as_rows() {
    let content =
        fixture("reordered_columns.gef").replace("2.500;0.025;0.54;0.006!", "2.500;0.025;0.54!");
    match GefParser.parse(&content) {
        Err(FormatError::ColumnCount {
            row, line, found, ..
        }) => {
            assert_eq!(row, 2);
            assert_eq!(line, 21);
            assert_eq!(found, 3);
        }
        other => panic!("expected ColumnCount error, got {other:?}"),
    }
}

#[test]
fn gef_with_byte_order_mark_is_detected() {
    let content = format!("\u{feff}{MINIMAL_GEF}");
    let record = parse_cpt_file(&content).expect("GEF with BOM");
    assert_eq!(record.source.format, SourceFormat::Gef);
    assert_eq!(record.id, "MINI");
    assert_eq!(record.sample_count(), 3);
}

#[test]
fn gef_data_before_end_of_header_is_missing_element() {
    let content = MINIMAL_GEF.replace("#EOH=\n", "#COMMENT= header left open\n");
    match GefParser.parse(&content) {
        Err(FormatError::MissingElement { element, .. }) => assert_eq!(element, "#EOH"),
        other => panic!("expected MissingElement error, got {other:?}"),
    }
}

#[test]
fn depth_source_displays_readable_name() {
    assert_eq!(DepthSource::InclinationCorrected.to_string(), "inclination corrected");
    assert_eq!(DepthSource::Measured.as_str(), "measured");
}
