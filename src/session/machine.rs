use super::connection::ConnectionLink;
use super::duration::DurationTracker;
use super::state::{CallSnapshot, CallState, Direction, ErrorSlot};
use crate::error::{CallError, CallResult};
use crate::event::{EventSender, SessionEvent};
use crate::microphone::MicrophoneAccess;
use crate::phone;
use crate::signaling::{CallEvent, CallEventReceiver, CallHandleRef, DialRequest};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-dial choices made by the operator.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Where remote audio is rendered; falls back to the configured sink
    pub audio_sink: Option<String>,
    /// Caller line to present; falls back to the credential's default line
    pub line_id: Option<String>,
}

struct Slot {
    generation: u64,
    call: CallHandleRef,
    direction: Direction,
    remote: Option<String>,
}

#[derive(Default)]
struct MachineState {
    state: CallState,
    /// Outbound call being dialed, or the call in progress
    active: Option<Slot>,
    /// Inbound call waiting for answer or reject
    incoming: Option<Slot>,
    muted: bool,
    dial_in_progress: bool,
    /// Set by `hangup` while a dial is in flight
    dial_cancelled: bool,
    next_generation: u64,
}

impl MachineState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn is_free(&self) -> bool {
        self.state == CallState::Idle
            && !self.dial_in_progress
            && self.active.is_none()
            && self.incoming.is_none()
    }
}

struct MachineInner {
    state: Mutex<MachineState>,
    duration: DurationTracker,
    microphone: Arc<dyn MicrophoneAccess>,
    link: Arc<ConnectionLink>,
    events: EventSender,
    errors: ErrorSlot,
    default_audio_sink: Option<String>,
}

/// Lifecycle of the one call the console tracks at a time.
///
/// Every call gets a generation number when it is slotted. Transport events
/// carry the generation of the call they were subscribed for, so events for
/// a call that has already been cleaned up are discarded.
#[derive(Clone)]
pub struct CallSessionStateMachine {
    inner: Arc<MachineInner>,
}

/// Clears the dial flags however `dial` exits.
struct DialGuard<'a>(&'a Mutex<MachineState>);

impl Drop for DialGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.0.lock();
        st.dial_in_progress = false;
        st.dial_cancelled = false;
    }
}

impl CallSessionStateMachine {
    pub(crate) fn new(
        link: Arc<ConnectionLink>,
        microphone: Arc<dyn MicrophoneAccess>,
        events: EventSender,
        errors: ErrorSlot,
        default_audio_sink: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(MachineInner {
                state: Mutex::new(MachineState::default()),
                duration: DurationTracker::new(),
                microphone,
                link,
                events,
                errors,
                default_audio_sink,
            }),
        }
    }

    pub fn state(&self) -> CallState {
        self.inner.state.lock().state
    }

    pub fn is_muted(&self) -> bool {
        self.inner.state.lock().muted
    }

    pub fn duration(&self) -> &DurationTracker {
        &self.inner.duration
    }

    pub fn last_error(&self) -> Option<CallError> {
        self.inner.errors.get()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let st = self.inner.state.lock();
        let slot = st.active.as_ref().or(st.incoming.as_ref());
        CallSnapshot {
            state: st.state,
            session_id: slot.map(|s| s.call.id()),
            remote: slot.and_then(|s| s.remote.clone()),
            direction: slot.map(|s| s.direction),
            muted: st.muted,
            elapsed_secs: self.inner.duration.elapsed(),
            formatted_duration: self.inner.duration.formatted(),
        }
    }

    /// Place an outbound call.
    ///
    /// Steps run strictly in order: microphone probe, destination
    /// normalization, call creation, then `start`. Returns the call id.
    ///
    /// A `hangup` while the dial is in flight cancels it, and a connection
    /// torn down under it fails it with `ConnectionRequired`. Either way a
    /// call the platform already created is hung up and no slot is left.
    pub async fn dial(&self, destination: &str, options: DialOptions) -> CallResult<String> {
        if self.inner.link.connected().is_none() {
            return Err(CallError::ConnectionRequired);
        }
        {
            let mut st = self.inner.state.lock();
            if !st.is_free() {
                return Err(CallError::AlreadyOnCall);
            }
            st.dial_in_progress = true;
            st.dial_cancelled = false;
        }
        let _guard = DialGuard(&self.inner.state);

        match self.inner.microphone.acquire().await {
            Ok(mut stream) => {
                debug!(tracks = stream.track_count(), "microphone probe granted");
                stream.stop_tracks();
            }
            Err(e) => {
                warn!("microphone permission denied: {}", e);
                return Err(CallError::PermissionDenied(e.to_string()));
            }
        }

        let to = phone::normalize(destination);
        if !phone::is_dialable(&to) {
            warn!(destination, "destination has no digits to dial");
            return Err(CallError::InvalidDestination(destination.to_string()));
        }
        if self.inner.state.lock().dial_cancelled {
            info!(to, "dial cancelled before the call was placed");
            return Err(CallError::DialCancelled);
        }
        let (client, credential, epoch) = self
            .inner
            .link
            .connected_at()
            .ok_or(CallError::ConnectionRequired)?;

        let line = options
            .line_id
            .as_deref()
            .and_then(|id| credential.line(id))
            .or_else(|| credential.default_line());
        let mut request = DialRequest::audio_only(to.clone());
        request.audio_sink = options
            .audio_sink
            .or_else(|| self.inner.default_audio_sink.clone());
        request
            .user_variables
            .insert("destination".to_string(), to.clone());
        match line {
            Some(line) => {
                request
                    .user_variables
                    .insert("callerID".to_string(), line.phone_number.clone());
            }
            None => warn!(to, "no caller line available, dialing without caller id"),
        }

        let call = client.dial(request).await.map_err(|e| {
            warn!(to, "dial rejected by transport: {}", e);
            self.record_error(CallError::transport(e))
        })?;
        let call_events = call.take_events();

        let slotted = {
            let mut st = self.inner.state.lock();
            let interrupted = self.dial_interrupted(&st, epoch);
            match interrupted {
                Some(e) => Err(e),
                None => {
                    let generation = st.next_generation();
                    st.active = Some(Slot {
                        generation,
                        call: call.clone(),
                        direction: Direction::Outbound,
                        remote: Some(to.clone()),
                    });
                    self.transition(&mut st, CallState::Dialing);
                    Ok(generation)
                }
            }
        };
        let generation = match slotted {
            Ok(generation) => generation,
            Err(e) => {
                info!(session_id = call.id(), to, "dial interrupted before start: {}", e);
                if let Err(err) = call.hangup().await {
                    debug!(session_id = call.id(), "hangup of interrupted dial: {}", err);
                }
                return Err(e);
            }
        };
        if let Some(rx) = call_events {
            self.listen(generation, rx);
        }

        if let Err(e) = call.start().await {
            warn!(session_id = call.id(), "call start failed: {}", e);
            self.end_call(Some(generation), "start failed");
            if let Err(e) = call.hangup().await {
                debug!(session_id = call.id(), "hangup after failed start: {}", e);
            }
            return Err(self.record_error(CallError::transport(e)));
        }

        // hangup or disconnect during start already released the slot
        let interrupted = self.dial_interrupted(&self.inner.state.lock(), epoch);
        if let Some(e) = interrupted {
            info!(session_id = call.id(), to, "dial interrupted during start: {}", e);
            self.end_call(Some(generation), "dial interrupted");
            if let Err(err) = call.hangup().await {
                debug!(session_id = call.id(), "hangup of interrupted dial: {}", err);
            }
            return Err(e);
        }

        info!(session_id = call.id(), to, generation, "outbound call started");
        Ok(call.id())
    }

    /// Accept the ringing inbound call.
    pub async fn answer(&self) -> CallResult<()> {
        let (generation, call) = {
            let st = self.inner.state.lock();
            match (&st.state, st.incoming.as_ref()) {
                (CallState::Ringing, Some(slot)) => (slot.generation, slot.call.clone()),
                _ => return Err(CallError::NoIncomingCall),
            }
        };

        if let Err(e) = call.answer().await {
            warn!(session_id = call.id(), "answer failed: {}", e);
            self.end_call(Some(generation), "answer failed");
            call.hangup().await.ok();
            return Err(self.record_error(CallError::transport(e)));
        }

        let mut st = self.inner.state.lock();
        match st.incoming.take() {
            Some(slot) if slot.generation == generation => {
                st.active = Some(slot);
                self.transition(&mut st, CallState::Active);
                self.inner.duration.start();
                info!(session_id = call.id(), generation, "incoming call answered");
                Ok(())
            }
            other => {
                // the caller went away while we were answering
                st.incoming = other;
                Err(CallError::NoIncomingCall)
            }
        }
    }

    /// Decline the ringing inbound call without starting the timer.
    pub async fn reject(&self) -> CallResult<()> {
        let generation = {
            let st = self.inner.state.lock();
            match (&st.state, st.incoming.as_ref()) {
                (CallState::Ringing, Some(slot)) => slot.generation,
                _ => return Err(CallError::NoIncomingCall),
            }
        };
        if let Some(slot) = self.end_call(Some(generation), "rejected") {
            if let Err(e) = slot.call.hangup().await {
                warn!(session_id = slot.call.id(), "reject hangup failed: {}", e);
            }
        }
        Ok(())
    }

    /// End whichever call exists, cancelling a dial still in flight.
    /// A no-op when there is neither.
    pub async fn hangup(&self) -> CallResult<()> {
        {
            let mut st = self.inner.state.lock();
            if st.dial_in_progress && !st.dial_cancelled {
                st.dial_cancelled = true;
                info!("hangup cancels the dial in progress");
            }
        }
        let Some(slot) = self.end_call(None, "local hangup") else {
            debug!("hangup with no call");
            return Ok(());
        };
        match slot.call.hangup().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(session_id = slot.call.id(), "hangup failed: {}", e);
                Err(self.record_error(CallError::transport(e)))
            }
        }
    }

    pub async fn mute(&self) {
        self.set_muted(true).await;
    }

    pub async fn unmute(&self) {
        self.set_muted(false).await;
    }

    pub async fn toggle_mute(&self) {
        let muted = self.inner.state.lock().muted;
        self.set_muted(!muted).await;
    }

    async fn set_muted(&self, muted: bool) {
        let (generation, call) = {
            let st = self.inner.state.lock();
            match (&st.state, st.active.as_ref()) {
                (CallState::Active, Some(slot)) => {
                    if st.muted == muted {
                        return;
                    }
                    (slot.generation, slot.call.clone())
                }
                _ => {
                    debug!(muted, "mute change ignored, no active call");
                    return;
                }
            }
        };

        let result = if muted {
            call.audio_mute().await
        } else {
            call.audio_unmute().await
        };
        if let Err(e) = result {
            warn!(session_id = call.id(), muted, "mute change failed: {}", e);
            self.record_error(CallError::transport(e));
            return;
        }

        let mut st = self.inner.state.lock();
        if st.active.as_ref().map(|s| s.generation) == Some(generation) && st.muted != muted {
            st.muted = muted;
            self.emit(SessionEvent::MuteChanged { muted });
        }
    }

    /// Best effort; failures are only logged.
    pub async fn send_dtmf(&self, digits: &str) {
        let call = {
            let st = self.inner.state.lock();
            match (&st.state, st.active.as_ref()) {
                (CallState::Active, Some(slot)) => slot.call.clone(),
                _ => {
                    debug!(digits, "dtmf ignored, no active call");
                    return;
                }
            }
        };
        if let Err(e) = call.send_digits(digits).await {
            warn!(session_id = call.id(), digits, "send dtmf failed: {}", e);
        }
    }

    /// Surface an inbound call. A call arriving while another is being
    /// dialed, rung or talked on is hung up as busy.
    pub(crate) fn on_incoming(&self, call: CallHandleRef) {
        let accepted = {
            let mut st = self.inner.state.lock();
            if st.is_free() {
                let generation = st.next_generation();
                st.incoming = Some(Slot {
                    generation,
                    call: call.clone(),
                    direction: Direction::Inbound,
                    remote: call.remote(),
                });
                self.transition(&mut st, CallState::Ringing);
                Some(generation)
            } else {
                None
            }
        };

        match accepted {
            Some(generation) => {
                info!(
                    session_id = call.id(),
                    remote = call.remote(),
                    generation,
                    "incoming call ringing"
                );
                self.emit(SessionEvent::IncomingCall {
                    session_id: call.id(),
                    remote: call.remote(),
                });
                if let Some(rx) = call.take_events() {
                    self.listen(generation, rx);
                }
            }
            None => {
                warn!(
                    session_id = call.id(),
                    remote = call.remote(),
                    state = %self.state(),
                    "busy, rejecting incoming call"
                );
                tokio::spawn(async move {
                    if let Err(e) = call.hangup().await {
                        debug!(session_id = call.id(), "busy hangup failed: {}", e);
                    }
                });
            }
        }
    }

    fn listen(&self, generation: u64, mut rx: CallEventReceiver) {
        let machine = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !machine.on_call_event(generation, event) {
                    break;
                }
            }
            debug!(generation, "call event listener finished");
        });
    }

    /// Apply a transport event. Returns whether the call is still tracked.
    pub(crate) fn on_call_event(&self, generation: u64, event: CallEvent) -> bool {
        match &event {
            CallEvent::StateChanged(state) if state.is_established() => {
                self.promote(generation)
            }
            CallEvent::RoomJoined => self.promote(generation),
            CallEvent::StateChanged(state) if state.is_terminal() => {
                self.end_call(Some(generation), event.name());
            }
            CallEvent::Destroy | CallEvent::RoomEnded => {
                self.end_call(Some(generation), event.name());
            }
            CallEvent::StateChanged(state) => {
                debug!(generation, ?state, "call state update");
            }
            CallEvent::Other(name) => {
                debug!(generation, event = name, "ignoring call event");
            }
        }
        self.is_tracked(generation)
    }

    fn is_tracked(&self, generation: u64) -> bool {
        let st = self.inner.state.lock();
        let tracked = [st.active.as_ref(), st.incoming.as_ref()]
            .into_iter()
            .flatten()
            .any(|slot| slot.generation == generation);
        tracked
    }

    /// Why an in-flight dial must not go on, if it must not.
    fn dial_interrupted(&self, st: &MachineState, epoch: u64) -> Option<CallError> {
        if !self.inner.link.is_current(epoch) {
            Some(CallError::ConnectionRequired)
        } else if st.dial_cancelled {
            Some(CallError::DialCancelled)
        } else {
            None
        }
    }

    fn promote(&self, generation: u64) {
        let mut st = self.inner.state.lock();
        let matches = st.active.as_ref().map(|s| s.generation) == Some(generation);
        if matches && st.state == CallState::Dialing {
            self.transition(&mut st, CallState::Active);
            self.inner.duration.start();
            info!(generation, "outbound call active");
        }
    }

    /// Release the slot for `generation` (or whichever call exists when
    /// `None`) and reset timer and mute. Returns `None` when there was
    /// nothing to release, which makes repeated end events no-ops.
    fn end_call(&self, generation: Option<u64>, reason: &str) -> Option<Slot> {
        let mut st = self.inner.state.lock();
        let in_active = match generation {
            Some(g) => st.active.as_ref().map(|s| s.generation) == Some(g),
            None => st.active.is_some(),
        };
        let slot = if in_active {
            st.active.take()
        } else {
            match generation {
                Some(g) if st.incoming.as_ref().map(|s| s.generation) != Some(g) => None,
                _ => st.incoming.take(),
            }
        }?;

        let duration_secs = self.inner.duration.elapsed();
        self.inner.duration.stop();
        let was_muted = std::mem::replace(&mut st.muted, false);
        // Ended is only observable as a transition; the lock is held until Idle
        self.transition(&mut st, CallState::Ended);
        self.transition(&mut st, CallState::Idle);

        info!(
            session_id = slot.call.id(),
            generation = slot.generation,
            reason,
            duration_secs,
            "call ended"
        );
        if was_muted {
            self.emit(SessionEvent::MuteChanged { muted: false });
        }
        self.emit(SessionEvent::CallEnded {
            session_id: slot.call.id(),
            direction: slot.direction,
            duration_secs,
        });
        Some(slot)
    }

    /// Drop local call state without touching the transport, for when the
    /// transport is already gone.
    pub(crate) fn release(&self, reason: &str) {
        self.end_call(None, reason);
    }

    fn transition(&self, st: &mut MachineState, to: CallState) {
        let from = st.state;
        if from == to {
            return;
        }
        st.state = to;
        debug!(%from, %to, "call state transition");
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        self.inner.events.send(event).ok();
    }

    fn record_error(&self, error: CallError) -> CallError {
        self.inner.errors.set(error.clone());
        self.emit(SessionEvent::Error {
            message: error.to_string(),
        });
        error
    }
}
