// Instruments are grouped by manufacturer.  Tektronix scopes share one command set for waveform transfer,
// so a single driver covers the TDS, DPO, MSO and MDO families

pub mod tektronix;
