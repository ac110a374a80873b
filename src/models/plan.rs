use uuid::{uuid, Uuid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: Uuid,
    pub name: &'static str,
    pub description: &'static str,
    pub max_messages_number: u32,
}

pub const FREE_PLAN_ID: Uuid = uuid!("95c10fdd-b92d-493a-a25d-3fee817c950a");

static PLANS: [Plan; 3] = [
    Plan {
        id: FREE_PLAN_ID,
        name: "Free",
        description: "Basic features to get started",
        max_messages_number: 100,
    },
    Plan {
        id: uuid!("741d4a3d-19b5-4a24-93ae-9b4890a40f7a"),
        name: "Basic",
        description: "Intermediate features",
        max_messages_number: 1_000,
    },
    Plan {
        id: uuid!("8d2c33c9-a6b9-448e-b76d-9c1ba92c5f03"),
        name: "Premium",
        description: "Every feature included",
        max_messages_number: 10_000,
    },
];

pub fn all() -> &'static [Plan] {
    &PLANS
}

pub fn find(id: Uuid) -> Option<&'static Plan> {
    PLANS.iter().find(|plan| plan.id == id)
}

/// Plans offered in the create-instance form. The free tier is assigned by the gateway.
pub fn selectable() -> impl Iterator<Item = &'static Plan> {
    PLANS.iter().filter(|plan| plan.id != FREE_PLAN_ID)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_is_known_but_not_selectable() {
        assert_eq!(find(FREE_PLAN_ID).map(|p| p.name), Some("Free"));
        let names: Vec<_> = selectable().map(|p| p.name).collect();
        assert_eq!(names, ["Basic", "Premium"]);
        assert_eq!(all().len(), 3);
    }
}
