//! Hand-written holiday-home model shared by the unit tests.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    entity::{Aggregate, EntityKind, EntityType, Model, Role},
    id::{EntityId, EventId},
    relationship::Relationships,
    root::AggregateRoot,
};

pub const DOCUMENTS: Role = Role::new("documents");
pub const ISSUES: Role = Role::new("issues");

#[derive(Debug, Clone, PartialEq)]
pub struct Home {
    pub beds: u32,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub inspector: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HomeEntity {
    Home(Home),
    Report(Report),
    Issue(Issue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HomeKind {
    Home,
    Report,
    Issue,
}

impl EntityKind for HomeKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Report => "report",
            Self::Issue => "issue",
        }
    }

    fn is_root(&self) -> bool {
        matches!(self, Self::Home)
    }
}

impl Model for HomeEntity {
    type Kind = HomeKind;

    fn kind(&self) -> HomeKind {
        match self {
            Self::Home(_) => HomeKind::Home,
            Self::Report(_) => HomeKind::Report,
            Self::Issue(_) => HomeKind::Issue,
        }
    }
}

macro_rules! entity_type {
    ($ty:ident) => {
        impl EntityType<HomeEntity> for $ty {
            const ENTITY_KIND: HomeKind = HomeKind::$ty;

            fn wrap(self) -> HomeEntity {
                HomeEntity::$ty(self)
            }

            fn peek(model: &HomeEntity) -> Option<&Self> {
                match model {
                    HomeEntity::$ty(inner) => Some(inner),
                    _ => None,
                }
            }

            fn peek_mut(model: &mut HomeEntity) -> Option<&mut Self> {
                match model {
                    HomeEntity::$ty(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

entity_type!(Home);
entity_type!(Report);
entity_type!(Issue);

impl Aggregate for Home {
    const KIND: &'static str = "home";
    const ROOT_KIND: HomeKind = HomeKind::Home;

    type Entity = HomeEntity;

    fn into_entity(self) -> HomeEntity {
        HomeEntity::Home(self)
    }

    fn from_entity(entity: &HomeEntity) -> Option<&Self> {
        <Self as EntityType<HomeEntity>>::peek(entity)
    }

    fn from_entity_mut(entity: &mut HomeEntity) -> Option<&mut Self> {
        <Self as EntityType<HomeEntity>>::peek_mut(entity)
    }
}

pub fn relationships() -> Relationships<HomeKind> {
    Relationships::new()
        .with(HomeKind::Home, HomeKind::Report, DOCUMENTS)
        .unwrap()
        .with(HomeKind::Report, HomeKind::Issue, ISSUES)
        .unwrap()
}

pub fn home(beds: u32) -> AggregateRoot<Home> {
    AggregateRoot::new(
        EntityId::new(),
        EventId::new(),
        Utc::now(),
        Home {
            beds,
            owner: "harriet".to_string(),
        },
        0,
        Arc::new(relationships()),
    )
}
