//! Compiler configuration.

use indexmap::IndexMap;

use crate::host::signature;

const RECEIVER: &str = "VRCUdonCommonInterfacesIUdonEventReceiver";

/// Host operations used for cross-instance access.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RemoteExterns {
    /// `(receiver, name, value)`.
    pub set_variable: String,
    /// `(receiver, name) -> object`.
    pub get_variable: String,
    /// `(receiver, event)`.
    pub send_event: String,
}

impl Default for RemoteExterns {
    fn default() -> Self {
        let (string, object) = ("SystemString".to_string(), "SystemObject".to_string());
        Self {
            set_variable: signature(
                RECEIVER,
                "SetProgramVariable",
                &[string.clone(), object],
                "SystemVoid",
            ),
            get_variable: signature(
                RECEIVER,
                "GetProgramVariable",
                std::slice::from_ref(&string),
                "SystemObject",
            ),
            send_event: signature(RECEIVER, "SendCustomEvent", &[string], "SystemVoid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompilerOptions {
    /// Host type identifier of compiled behaviours (the type of `this`).
    pub behaviour_type: String,
    pub remote: RemoteExterns,
    /// Exported method name -> host event entry name.
    pub events: IndexMap<String, String>,
    /// Event that runs constructor logic before its own body.
    pub start_event: String,
    pub debug_map: bool,
    /// Replace calls to trivial getters/setters with direct field access.
    pub inline_accessors: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        let events = [
            ("Start", "_start"),
            ("Update", "_update"),
            ("LateUpdate", "_lateUpdate"),
            ("FixedUpdate", "_fixedUpdate"),
            ("Interact", "_interact"),
            ("OnEnable", "_onEnable"),
            ("OnDisable", "_onDisable"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            behaviour_type: "VRCUdonUdonBehaviour".into(),
            remote: RemoteExterns::default(),
            events,
            start_event: "_start".into(),
            debug_map: true,
            inline_accessors: true,
        }
    }
}

impl CompilerOptions {
    pub fn with_behaviour_type(mut self, ident: &str) -> Self {
        self.behaviour_type = ident.to_string();
        self
    }

    pub fn with_event(mut self, method: &str, entry: &str) -> Self {
        self.events.insert(method.to_string(), entry.to_string());
        self
    }

    pub fn with_debug_map(mut self, enabled: bool) -> Self {
        self.debug_map = enabled;
        self
    }

    pub fn with_inline_accessors(mut self, enabled: bool) -> Self {
        self.inline_accessors = enabled;
        self
    }

    pub fn with_remote(mut self, remote: RemoteExterns) -> Self {
        self.remote = remote;
        self
    }

    /// Host entry name for an exported method.
    pub fn event_name(&self, method: &str) -> Option<&str> {
        self.events.get(method).map(String::as_str)
    }
}
