use crate::config::{InboundConfig, OutboundConfig, RingMode};
use serde::{Deserialize, Serialize};

pub const RING_PLAN_VERSION: &str = "1.0.0";

/// Declarative call handling instructions returned to the telephony platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RingPlan {
    pub version: String,
    pub sections: Sections,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sections {
    pub main: Vec<Instruction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Answer {},
    Play(Play),
    Connect(Connect),
    Hangup {},
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Play {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub say: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectLeg {
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Connect {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<Vec<ConnectLeg>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<Vec<ConnectLeg>>,
    pub timeout: u32,
}

impl Instruction {
    pub fn say(text: &str) -> Self {
        Instruction::Play(Play {
            urls: None,
            say: Some(text.to_string()),
        })
    }

    pub fn pause(secs: f32) -> Self {
        Instruction::Play(Play {
            urls: Some(vec![format!("silence:{}", secs)]),
            say: None,
        })
    }
}

impl RingPlan {
    pub fn new(main: Vec<Instruction>) -> Self {
        Self {
            version: RING_PLAN_VERSION.to_string(),
            sections: Sections { main },
        }
    }

    /// Answer, play an apology, hang up.
    pub fn apology(message: &str) -> Self {
        Self::new(vec![
            Instruction::Answer {},
            Instruction::say(message),
            Instruction::Hangup {},
        ])
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.sections.main
    }

    /// The connect instruction, when the plan rings anyone.
    pub fn connect(&self) -> Option<&Connect> {
        self.sections.main.iter().find_map(|i| match i {
            Instruction::Connect(c) => Some(c),
            _ => None,
        })
    }
}

/// Ring every target in the configured mode, then fall back to a busy message.
/// An empty target list yields the unavailable apology.
pub fn inbound_plan(targets: &[String], config: &InboundConfig) -> RingPlan {
    if targets.is_empty() {
        return RingPlan::apology(&config.unavailable_message);
    }
    let legs: Vec<ConnectLeg> = targets
        .iter()
        .map(|to| ConnectLeg { to: to.clone() })
        .collect();
    let mut connect = Connect {
        timeout: config.ring_timeout_secs,
        ..Default::default()
    };
    match config.ring_mode {
        RingMode::Parallel => connect.parallel = Some(legs),
        RingMode::Serial => connect.serial = Some(legs),
    }
    let mut main = vec![Instruction::Answer {}];
    if config.pause_secs > 0.0 {
        main.push(Instruction::pause(config.pause_secs));
    }
    main.push(Instruction::Connect(connect));
    main.push(Instruction::say(&config.busy_message));
    main.push(Instruction::Hangup {});
    RingPlan::new(main)
}

/// Bridge the browser leg to a PSTN destination showing `caller_id`.
pub fn outbound_plan(destination: &str, caller_id: Option<&str>, config: &OutboundConfig) -> RingPlan {
    let connect = Connect {
        from: caller_id.map(|c| c.to_string()),
        to: Some(destination.to_string()),
        timeout: config.ring_timeout_secs,
        ..Default::default()
    };
    let mut main = vec![Instruction::Answer {}];
    if config.pause_secs > 0.0 {
        main.push(Instruction::pause(config.pause_secs));
    }
    main.push(Instruction::Connect(connect));
    main.push(Instruction::say(&config.failure_message));
    main.push(Instruction::Hangup {});
    RingPlan::new(main)
}
