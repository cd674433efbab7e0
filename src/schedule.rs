//! 전송 슬롯 스케줄
//!
//! 경과 시간을 누적해서 현재 전송률 기준 간격이 찰 때마다 슬롯 하나를 내준다.

/// 전송 누적기 (틱마다 갱신, 저장되지 않음)
#[derive(Debug, Clone, Default)]
pub struct SendSchedule {
    accumulator: f64,
}

impl SendSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// 경과 시간 누적
    pub fn advance(&mut self, delta_time: f64) {
        self.accumulator += delta_time;
    }

    /// `rate` (슬롯/초) 기준으로 슬롯 하나를 꺼냄
    pub fn take_slot(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let interval = 1.0 / rate;
        if self.accumulator > interval {
            self.accumulator -= interval;
            true
        } else {
            false
        }
    }

    /// 이번 틱에 쓸 수 있는 슬롯을 모두 꺼냄
    pub fn drain_slots(&mut self, rate: f64) -> usize {
        let mut slots = 0;
        while self.take_slot(rate) {
            slots += 1;
        }
        slots
    }

    pub fn pending(&self) -> f64 {
        self.accumulator
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_slots_at_the_advised_rate() {
        let mut schedule = SendSchedule::new();
        let mut slots = 0;
        // 10초 동안 30Hz 틱, 10 슬롯/초
        for _ in 0..300 {
            schedule.advance(1.0 / 30.0);
            slots += schedule.drain_slots(10.0);
        }
        assert!((99..=100).contains(&slots), "slots = {slots}");
    }

    #[test]
    fn needs_strictly_more_than_one_interval() {
        let mut schedule = SendSchedule::new();
        schedule.advance(0.25);
        assert!(!schedule.take_slot(4.0));
        schedule.advance(0.01);
        assert!(schedule.take_slot(4.0));
        assert!(schedule.pending() < 0.25);
    }

    #[test]
    fn large_delta_grants_several_slots() {
        let mut schedule = SendSchedule::new();
        schedule.advance(1.05);
        assert_eq!(schedule.drain_slots(10.0), 10);
        schedule.reset();
        assert_eq!(schedule.pending(), 0.0);
    }
}
