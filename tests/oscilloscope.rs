use tekscope::transport::LoopbackTransport;
use tekscope::{AcquireOptions, AcquisitionPolicy, ErrorKind, Oscilloscope, ScopeError, WaveformSet};

const IDN: &str = "TEKTRONIX,MODEL,0,1.0";

const BINARY_PREAMBLE: &str = ":WFMOUTPRE:BYT_NR 2;BIT_NR 16;ENCDG BIN;BN_FMT RI;BYT_OR MSB;NR_PT 3;\
    PT_FMT Y;XUNIT \"s\";XINCR 1.0E-6;XZERO -1.0E-6;PT_OFF 0;YUNIT \"V\";YMULT 0.5;YOFF 0;YZERO 0";

fn binary_curve() -> Vec<u8> {
    let mut reply = b"#16".to_vec();
    reply.extend_from_slice(&[0x00, 0x02, 0xFF, 0xFE, 0x00, 0x00]);
    reply.push(b'\n');
    reply
}

fn scripted_scope() -> LoopbackTransport {
    LoopbackTransport::new()
        .respond("*IDN?", IDN)
        .respond("HORIZONTAL:RECORDLENGTH?", "3")
        .respond("WFMOUTPRE?", BINARY_PREAMBLE)
        .respond("CURVE?", binary_curve())
        .respond("SELECT:CH1?", "1")
        .respond("SELECT:CH2?", "1")
        .respond("SELECT:CH3?", "0")
}

#[test]
fn binary_acquisition_end_to_end() {
    let link = scripted_scope();
    let sent = link.sent();
    let mut osc = Oscilloscope::with_transport(Box::new(link), false).unwrap();

    let data = osc.get_data(&["CH1", "CH2"]).unwrap();
    assert_eq!(data.sources(), vec!["CH1", "CH2"]);
    assert_eq!(data.idn(), IDN);

    let ch1 = &data["CH1"];
    assert_eq!(ch1.values(), &[1.0, -1.0, 0.0]);
    assert_eq!(ch1.times(), vec![-1.0e-6, 0.0, 1.0e-6]);
    assert_eq!(data.header().get("YUNIT").map(|s| s.as_str()), Some("V"));

    let commands = sent.commands();
    assert_eq!(commands.iter().filter(|c| *c == "*IDN?").count(), 1);
    assert!(commands.contains(&"DATA:SOURCE CH2".to_owned()));
    assert!(commands.contains(&"DATA:STOP 3".to_owned()));
}

#[test]
fn nonexistent_channel_fails() {
    let mut osc = Oscilloscope::with_transport(Box::new(scripted_scope()), false).unwrap();
    let err = osc.get_data(&["CH12"]).unwrap_err();
    assert!(matches!(err, ScopeError::InvalidSource(_)));
    assert_eq!(err.kind(), ErrorKind::Usage);
}

#[test]
fn results_of_two_acquisitions_merge() {
    let mut osc = Oscilloscope::with_transport(Box::new(scripted_scope()), false).unwrap();
    let options = AcquireOptions {
        policy: AcquisitionPolicy::BestEffort,
        ..AcquireOptions::default()
    };

    let mut first = osc.get_data_with(&["CH1", "CH3"], &options).unwrap();
    let second = osc.get_data(&["CH2"]).unwrap();
    assert_eq!(first.skipped()[0].source, "CH3");

    first.merge(second).unwrap();
    assert_eq!(first.sources(), vec!["CH1", "CH2"]);

    let other = WaveformSet::new("TEKTRONIX,OTHER,0,1.0");
    assert!(first.merge(other).is_err());
}

#[test]
fn json_output_keeps_request_order() {
    let mut osc = Oscilloscope::with_transport(Box::new(scripted_scope()), false).unwrap();
    let data = osc.get_data(&["CH2", "CH1"]).unwrap();

    let json: serde_json::Value = serde_json::to_value(&data).unwrap();
    assert_eq!(json["sources"], serde_json::json!(["CH2", "CH1"]));
    assert_eq!(json["waveforms"]["CH1"]["values"], serde_json::json!([1.0, -1.0, 0.0]));
}

#[test]
fn closing_twice_is_a_no_op() {
    let mut osc = Oscilloscope::with_transport(Box::new(scripted_scope()), false).unwrap();
    osc.close().unwrap();
    osc.close().unwrap();
    assert!(!osc.is_open());
    assert!(osc.get_data(&["CH1"]).is_err());
}
