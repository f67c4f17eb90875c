//! Defines the connection state machine.
//!
//! The actor never decides a transition ad hoc: it turns whatever happened into
//! a [`Trigger`], asks [`StateMachine::step`] what that means in the current
//! state, and carries out the returned [`Step`]. Every state change it then
//! makes is checked against [`StateValidator::is_valid_transition`].
//!
//! 定义连接状态机。
//!
//! actor 从不临时决定状态转换：它把发生的事情转换为 [`Trigger`]，
//! 询问 [`StateMachine::step`] 在当前状态下的含义，然后执行返回的 [`Step`]。
//! 随后的每次状态变更都会通过 [`StateValidator::is_valid_transition`] 校验。

use std::fmt;

/// The state of a connection.
/// 连接的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport, no attempt in flight. Initial state.
    /// 没有传输实例，也没有进行中的尝试。初始状态。
    Disconnected,
    /// A transport is acquiring a link.
    /// 传输实例正在获取链路。
    Connecting,
    /// The link is up and channels can be created.
    /// 链路已建立，可以创建通道。
    Connected,
    /// The last attempt failed. A retry re-enters `Connecting`.
    /// 上一次尝试失败。重试会重新进入 `Connecting`。
    Failed,
    /// Terminal.
    /// 终止状态。
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the connection.
/// 连接上发生的事情。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// A caller wants a usable link (`connect` or `get_channel`).
    Connect,
    Acquired,
    TransportFailed,
    LinkClosed,
    Released,
    /// `fail_after` expired.
    Timeout,
    /// `retry_after` expired.
    RetryDue,
    ChannelFailed,
}

/// What the actor has to do about a trigger.
/// actor 需要对触发器执行的操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Nothing to do in this state.
    Ignore,
    /// Create a new transport and enter `Connecting`.
    StartAttempt,
    /// Wait behind the attempt already in flight.
    Join,
    /// The link is already up.
    Ready,
    /// Enter `Connected`.
    Establish,
    /// Enter `Failed` and give up the transport.
    Fail,
    /// Enter `Failed` but keep the transport; no loss was observed.
    FailRetainingLink,
    /// Link lost while connected; start over in `Connecting`.
    Reconnect,
    /// The link kept through `Failed` was lost after all.
    DropLink,
    /// The connection is closed.
    Reject,
}

/// The `(state, trigger) -> step` table.
/// `(状态, 触发器) -> 步骤` 表。
pub(crate) struct StateMachine;

impl StateMachine {
    pub(crate) fn step(state: ConnectionState, trigger: Trigger) -> Step {
        use ConnectionState::*;
        use Trigger::*;

        match (state, trigger) {
            (Closed, Connect) => Step::Reject,
            (Closed, _) => Step::Ignore,

            (Disconnected | Failed, Connect) => Step::StartAttempt,
            (Connecting, Connect) => Step::Join,
            (Connected, Connect) => Step::Ready,

            (Connecting, Acquired) => Step::Establish,
            (Connecting, TransportFailed | LinkClosed | Released | Timeout) => Step::Fail,

            (Connected, TransportFailed | LinkClosed | Released) => Step::Reconnect,
            (Connected, ChannelFailed) => Step::FailRetainingLink,

            (Failed, RetryDue) => Step::StartAttempt,
            (Failed, TransportFailed | LinkClosed | Released) => Step::DropLink,

            _ => Step::Ignore,
        }
    }
}

/// Validates state changes.
/// 校验状态变更。
pub(crate) struct StateValidator;

impl StateValidator {
    /// 验证状态转换是否合法
    /// Validate if state transition is legal
    pub(crate) fn is_valid_transition(current: ConnectionState, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (current, next) {
            (Closed, _) => false,
            (_, Closed) => true,

            (Disconnected | Failed | Connected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting | Connected, Failed) => true,

            _ => false,
        }
    }

    /// Whether the link can carry channels in this state.
    /// 在此状态下链路是否可以承载通道。
    pub(crate) fn is_usable(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_connect_step_per_state() {
        assert_eq!(StateMachine::step(Disconnected, Trigger::Connect), Step::StartAttempt);
        assert_eq!(StateMachine::step(Failed, Trigger::Connect), Step::StartAttempt);
        assert_eq!(StateMachine::step(Connecting, Trigger::Connect), Step::Join);
        assert_eq!(StateMachine::step(Connected, Trigger::Connect), Step::Ready);
        assert_eq!(StateMachine::step(Closed, Trigger::Connect), Step::Reject);
    }

    #[test]
    fn test_loss_while_connected_reconnects_instead_of_failing() {
        assert_eq!(StateMachine::step(Connected, Trigger::LinkClosed), Step::Reconnect);
        assert_eq!(StateMachine::step(Connected, Trigger::TransportFailed), Step::Reconnect);
        assert_eq!(StateMachine::step(Connected, Trigger::Released), Step::Reconnect);
    }

    #[test]
    fn test_channel_failure_keeps_the_link() {
        assert_eq!(
            StateMachine::step(Connected, Trigger::ChannelFailed),
            Step::FailRetainingLink
        );
        assert_eq!(StateMachine::step(Failed, Trigger::LinkClosed), Step::DropLink);
        assert_eq!(StateMachine::step(Failed, Trigger::Released), Step::DropLink);
        assert_eq!(StateMachine::step(Failed, Trigger::ChannelFailed), Step::Ignore);
    }

    #[test]
    fn test_failures_while_connecting() {
        for trigger in [
            Trigger::TransportFailed,
            Trigger::LinkClosed,
            Trigger::Released,
            Trigger::Timeout,
        ] {
            assert_eq!(StateMachine::step(Connecting, trigger), Step::Fail);
        }
    }

    #[test]
    fn test_late_triggers_are_ignored() {
        assert_eq!(StateMachine::step(Connected, Trigger::Timeout), Step::Ignore);
        assert_eq!(StateMachine::step(Connected, Trigger::Acquired), Step::Ignore);
        assert_eq!(StateMachine::step(Failed, Trigger::Acquired), Step::Ignore);
        assert_eq!(StateMachine::step(Connecting, Trigger::RetryDue), Step::Ignore);
        assert_eq!(StateMachine::step(Closed, Trigger::LinkClosed), Step::Ignore);
    }

    #[test]
    fn test_valid_transitions() {
        assert!(StateValidator::is_valid_transition(Disconnected, Connecting));
        assert!(StateValidator::is_valid_transition(Connecting, Connected));
        assert!(StateValidator::is_valid_transition(Connected, Connecting));
        assert!(StateValidator::is_valid_transition(Failed, Connecting));
        assert!(StateValidator::is_valid_transition(Connecting, Closed));

        assert!(!StateValidator::is_valid_transition(Disconnected, Connected));
        assert!(!StateValidator::is_valid_transition(Failed, Connected));
        assert!(!StateValidator::is_valid_transition(Closed, Connecting));
        assert!(!StateValidator::is_valid_transition(Closed, Closed));
        assert!(!StateValidator::is_valid_transition(Connected, Disconnected));
    }

    #[test]
    fn test_only_connected_is_usable() {
        assert!(StateValidator::is_usable(Connected));
        for state in [Disconnected, Connecting, Failed, Closed] {
            assert!(!StateValidator::is_usable(state));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Connected.to_string(), "connected");
        assert_eq!(format!("{}", Failed), "failed");
    }
}
