// Board text events - ASCII responses and async text decoded into discrete events
use serde::Serialize;

const CYCLE_START: &str = "Cycle start";
const TIMEOUT: &str = "timeout";
const TIMER_FREQ_RESPONSE: &str = "V301_";
const TIMER_FREQ_FIELD_LEN: usize = 4;
const INPUT_BITS_RESPONSE: &str = "O_ISW1=";
const AT_HOME_RESPONSE: &str = "R_At home";
const POS_AT_IMPACT_RESPONSE: &str = "R_POS1EOS";
const VERSION_RESPONSE: &str = "R:6#emc_";
const VERSION_RESPONSE2: &str = "R:6#cyc_";
const CONTROL_FILE_DATE: &str = "V447";
const UPLOAD_COPY_DATE: &str = "V448";
const ANALOG_RESPONSE: &str = "O_CH";
const FATAL_OR_WARNING_RESPONSE: &str = "_Cont.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BoardEvent {
    CycleStart,
    CycleTimeout,
    TimerFrequency(u32),
    InputBits(u32),
    AtHome,
    /// Raw quadrature counts reported at impact.
    PositionAtImpact(f64),
    Version {
        version: u8,
        sub_version: u8,
        label: String,
    },
    /// `None` when the board holds no control file.
    ControlFileDate(Option<u32>),
    UploadCopyDate(Option<u32>),
    AnalogResponse(String),
    FatalOrWarning {
        fatal: bool,
        text: String,
    },
    Other(String),
}

impl BoardEvent {
    pub fn parse(text: &str) -> Self {
        if text.contains(CYCLE_START) {
            if text.contains(TIMEOUT) {
                return BoardEvent::CycleTimeout;
            }
            return BoardEvent::CycleStart;
        }

        if let Some(rest) = after(text, TIMER_FREQ_RESPONSE) {
            if let Some(freq) = rest
                .get(..TIMER_FREQ_FIELD_LEN)
                .and_then(|s| s.trim().parse().ok())
            {
                return BoardEvent::TimerFrequency(freq);
            }
        }

        if let Some(rest) = after(text, INPUT_BITS_RESPONSE) {
            if let Ok(bits) = u32::from_str_radix(rest.trim(), 16) {
                return BoardEvent::InputBits(bits);
            }
        }

        if text.contains(AT_HOME_RESPONSE) {
            return BoardEvent::AtHome;
        }

        if let Some(rest) = after(text, POS_AT_IMPACT_RESPONSE) {
            if let Some(counts) = rest
                .split_once('#')
                .and_then(|(_, v)| v.trim().parse().ok())
            {
                return BoardEvent::PositionAtImpact(counts);
            }
        }

        if let Some(rest) = after(text, VERSION_RESPONSE).or_else(|| after(text, VERSION_RESPONSE2)) {
            if let Some(event) = parse_version(rest) {
                return event;
            }
        }

        if let Some(rest) = text.strip_prefix(CONTROL_FILE_DATE) {
            return BoardEvent::ControlFileDate(parse_file_date(rest));
        }

        if let Some(rest) = text.strip_prefix(UPLOAD_COPY_DATE) {
            return BoardEvent::UploadCopyDate(parse_file_date(rest));
        }

        if text.starts_with(ANALOG_RESPONSE) {
            return BoardEvent::AnalogResponse(text.to_string());
        }

        if text.get(1..).is_some_and(|s| s.starts_with(FATAL_OR_WARNING_RESPONSE)) {
            let fatal = text.starts_with(['F', 'f']);
            let body = text
                .get(1 + FATAL_OR_WARNING_RESPONSE.len()..)
                .unwrap_or_default()
                .trim()
                .to_string();
            return BoardEvent::FatalOrWarning { fatal, text: body };
        }

        BoardEvent::Other(text.to_string())
    }

    /// IO-change payloads carry the input word in their first four bytes.
    pub fn from_io_change(payload: &[u8]) -> Option<Self> {
        let word: [u8; 4] = payload.get(..4)?.try_into().ok()?;
        Some(BoardEvent::InputBits(u32::from_be_bytes(word)))
    }
}

fn after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.find(marker).map(|cp| &text[cp + marker.len()..])
}

fn parse_version(rest: &str) -> Option<BoardEvent> {
    let version = rest.get(..1)?.parse().ok()?;
    let sub_version = rest.get(2..4)?.parse().ok()?;
    let label = match rest.find(',') {
        Some(comma) => rest[..comma].to_string(),
        None => rest.trim().to_string(),
    };
    Some(BoardEvent::Version {
        version,
        sub_version,
        label,
    })
}

fn parse_file_date(rest: &str) -> Option<u32> {
    let rest = rest.trim_start_matches('=').trim();
    if rest.starts_with('-') {
        return None;
    }
    match rest.parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(date) => Some(date),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_start_and_timeout() {
        assert_eq!(BoardEvent::parse("R_Cycle start"), BoardEvent::CycleStart);
        assert_eq!(BoardEvent::parse("R_Cycle start timeout"), BoardEvent::CycleTimeout);
    }

    #[test]
    fn test_timer_frequency() {
        assert_eq!(BoardEvent::parse("V301_2000"), BoardEvent::TimerFrequency(2000));
    }

    #[test]
    fn test_input_bits() {
        assert_eq!(BoardEvent::parse("O_ISW1=0008000a"), BoardEvent::InputBits(0x0008_000A));
        assert_eq!(
            BoardEvent::from_io_change(&[0x00, 0x08, 0x00, 0x0A, 0xFF]),
            Some(BoardEvent::InputBits(0x0008_000A))
        );
        assert_eq!(BoardEvent::from_io_change(&[1, 2]), None);
    }

    #[test]
    fn test_at_home_and_impact() {
        assert_eq!(BoardEvent::parse("R_At home"), BoardEvent::AtHome);
        assert_eq!(
            BoardEvent::parse("R_POS1EOS #1520"),
            BoardEvent::PositionAtImpact(1520.0)
        );
    }

    #[test]
    fn test_version() {
        assert_eq!(
            BoardEvent::parse("R:6#emc_5.07 build,Jan 3 2020"),
            BoardEvent::Version {
                version: 5,
                sub_version: 7,
                label: "5.07 build".to_string(),
            }
        );
        assert!(matches!(
            BoardEvent::parse("R:6#cyc_3.12"),
            BoardEvent::Version { version: 3, sub_version: 12, .. }
        ));
    }

    #[test]
    fn test_file_dates() {
        assert_eq!(BoardEvent::parse("V447-"), BoardEvent::ControlFileDate(None));
        assert_eq!(BoardEvent::parse("V4470"), BoardEvent::ControlFileDate(None));
        assert_eq!(
            BoardEvent::parse("V448 1589000000"),
            BoardEvent::UploadCopyDate(Some(1_589_000_000))
        );
    }

    #[test]
    fn test_fatal_and_warning() {
        assert_eq!(
            BoardEvent::parse("F_Cont. Valve fault"),
            BoardEvent::FatalOrWarning {
                fatal: true,
                text: "Valve fault".to_string()
            }
        );
        assert!(matches!(
            BoardEvent::parse("W_Cont. Low oil"),
            BoardEvent::FatalOrWarning { fatal: false, .. }
        ));
    }

    #[test]
    fn test_unmatched_text() {
        assert_eq!(
            BoardEvent::parse("hello"),
            BoardEvent::Other("hello".to_string())
        );
    }
}
