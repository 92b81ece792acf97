use failsafe::{backoff, failure_policy, Config};
use std::time::Duration;

/// Circuit breaker type used by the matching client.
pub type MatchingCircuitBreaker = failsafe::StateMachine<
    failure_policy::ConsecutiveFailures<backoff::Exponential>,
    (),
>;

/// Creates a circuit breaker for bureau matching API calls so a flapping
/// vendor fails fast instead of stacking 30s timeouts.
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
pub fn create_matching_circuit_breaker() -> MatchingCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = create_matching_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("vendor timeout"));
            assert!(result.is_err());
        }

        // Next call should be rejected (circuit is open)
        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("expected open circuit to reject the call"),
        }
    }

    #[test]
    fn allows_success_when_closed() {
        let cb = create_matching_circuit_breaker();
        let result: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(42));
        assert_eq!(result.unwrap(), 42);
    }
}
