//! Contact events and per-body impulse aggregation.

use glam::Vec3;

use crate::physics::BodyId;

/// One contact reported by a physics backend during a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactEvent {
    pub body_a_id: BodyId,
    pub body_b_id: BodyId,
    /// World contact position.
    pub position: Vec3,
    /// Normal on body B, pointing toward body A.
    pub contact_normal: Vec3,
    /// Accumulated normal impulse, never negative.
    pub impulse_magnitude: f32,
}

impl ImpactEvent {
    pub fn new(body_a_id: BodyId, body_b_id: BodyId, position: Vec3, contact_normal: Vec3, impulse: f32) -> Self {
        Self {
            body_a_id,
            body_b_id,
            position,
            contact_normal,
            impulse_magnitude: if impulse.is_nan() { 0.0 } else { impulse.max(0.0) },
        }
    }

    pub fn involves(&self, body: BodyId) -> bool {
        self.body_a_id == body || self.body_b_id == body
    }
}

/// Impulse gathered for one tracked body over a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateImpact {
    /// Sum of the impulses of contacts touching the body.
    pub total_impulse: f32,
    /// Every contact of the step, strongest first.
    pub events: Vec<ImpactEvent>,
}

impl AggregateImpact {
    /// Strongest `n` events.
    pub fn strongest(&self, n: usize) -> &[ImpactEvent] {
        &self.events[..n.min(self.events.len())]
    }

    fn push(&mut self, event: ImpactEvent) {
        // Stable: equal impulses keep arrival order.
        let at = self
            .events
            .partition_point(|e| e.impulse_magnitude >= event.impulse_magnitude);
        self.events.insert(at, event);
    }
}

/// Stateless reduction of raw contacts into per-body totals.
///
/// Totals only count contacts that touch the body. The detailed list of
/// every tracked body receives every contact of the step, so the encoder
/// sees the strongest impacts of the whole scene.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImpactEventAggregator;

impl ImpactEventAggregator {
    /// One entry per tracked body, in `tracked` order.
    pub fn aggregate(contacts: &[ImpactEvent], tracked: &[BodyId]) -> Vec<(BodyId, AggregateImpact)> {
        let mut result: Vec<(BodyId, AggregateImpact)> = tracked
            .iter()
            .map(|&body| (body, AggregateImpact::default()))
            .collect();

        for contact in contacts {
            for (body, aggregate) in &mut result {
                if contact.involves(*body) {
                    aggregate.total_impulse += contact.impulse_magnitude;
                }
                aggregate.push(*contact);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(a: u64, b: u64, impulse: f32) -> ImpactEvent {
        ImpactEvent::new(BodyId(a), BodyId(b), Vec3::ZERO, Vec3::Y, impulse)
    }

    #[test]
    fn test_negative_impulse_clamped() {
        assert_eq!(contact(1, 2, -3.0).impulse_magnitude, 0.0);
        assert_eq!(contact(1, 2, f32::NAN).impulse_magnitude, 0.0);
        assert_eq!(contact(1, 2, 3.0).impulse_magnitude, 3.0);
    }

    #[test]
    fn test_totals_only_count_matching_contacts() {
        let contacts = [contact(1, 2, 10.0), contact(2, 3, 5.0), contact(4, 5, 100.0)];
        let result = ImpactEventAggregator::aggregate(&contacts, &[BodyId(2), BodyId(1), BodyId(9)]);

        assert_eq!(result[0].0, BodyId(2));
        assert_eq!(result[0].1.total_impulse, 15.0);
        assert_eq!(result[1].1.total_impulse, 10.0);
        assert_eq!(result[2].1.total_impulse, 0.0);
    }

    #[test]
    fn test_detailed_lists_hold_every_contact_sorted() {
        let contacts = [contact(1, 2, 10.0), contact(4, 5, 100.0), contact(2, 3, 5.0)];
        let result = ImpactEventAggregator::aggregate(&contacts, &[BodyId(9)]);
        let impulses: Vec<f32> = result[0].1.events.iter().map(|e| e.impulse_magnitude).collect();
        assert_eq!(impulses, vec![100.0, 10.0, 5.0]);
        assert_eq!(result[0].1.strongest(2).len(), 2);
        assert_eq!(result[0].1.strongest(7).len(), 3);
    }

    #[test]
    fn test_equal_impulses_keep_arrival_order() {
        let contacts = [contact(1, 2, 7.0), contact(1, 3, 7.0), contact(1, 4, 7.0)];
        let result = ImpactEventAggregator::aggregate(&contacts, &[BodyId(1)]);
        let partners: Vec<u64> = result[0].1.events.iter().map(|e| e.body_b_id.0).collect();
        assert_eq!(partners, vec![2, 3, 4]);
    }

    #[test]
    fn test_total_is_monotonic_in_contacts() {
        let mut contacts = Vec::new();
        let mut last = 0.0;
        for i in 0..20 {
            contacts.push(contact(1, 2 + i, (i * 37 % 11) as f32));
            let total = ImpactEventAggregator::aggregate(&contacts, &[BodyId(1)])[0].1.total_impulse;
            assert!(total >= last, "total dropped from {} to {}", last, total);
            last = total;
        }
    }

    #[test]
    fn test_no_contacts() {
        let result = ImpactEventAggregator::aggregate(&[], &[BodyId(1)]);
        assert_eq!(result[0].1, AggregateImpact::default());
    }
}
