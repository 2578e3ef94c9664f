use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The club itself, the resource for actions that have no document yet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Club {
    id: Uuid,
}

impl Club {
    pub fn default() -> Self {
        Self { id: Uuid::nil() }
    }
}

impl PolarClass for Club {
    fn get_polar_class_builder() -> oso::ClassBuilder<Club> {
        oso::Class::builder()
            .name("Club")
            .add_attribute_getter("id", |recv: &Club| recv.id.clone())
            .add_class_method("default", Club::default)
    }

    fn get_polar_class() -> oso::Class {
        let builder = Club::get_polar_class_builder();
        builder.build()
    }
}
