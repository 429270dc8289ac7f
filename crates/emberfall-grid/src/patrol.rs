//! Precomputed patrol routes.
//!
//! A patrol resource is a JSON array of route sets produced offline for one
//! spawn area. Each route holds an ordered list of legs; a leg is a start
//! cell, an end cell and the cells to walk between them.
//!
//! ```json
//! [{"id": 1, "paths": [{"startX": 3, "startY": 4, "endX": 5, "endY": 4,
//!                        "cells": [{"x": 3, "y": 4}, {"x": 4, "y": 4}, {"x": 5, "y": 4}]}]}]
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geom::{Coord, GridPos};
use crate::GridError;

/// One walkable leg of a patrol route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatrolLeg {
    pub start_x: Coord,
    pub start_y: Coord,
    pub end_x: Coord,
    pub end_y: Coord,
    pub cells: Arc<[GridPos]>,
}

impl PatrolLeg {
    pub fn start(&self) -> GridPos {
        GridPos::new(self.start_x, self.start_y)
    }

    pub fn end(&self) -> GridPos {
        GridPos::new(self.end_x, self.end_y)
    }
}

/// A route set: legs walked in order, wrapping around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatrolRoute {
    pub id: i64,
    pub paths: Vec<PatrolLeg>,
}

impl PatrolRoute {
    /// Leg `index`, wrapping past the end.
    pub fn leg(&self, index: usize) -> Option<&PatrolLeg> {
        if self.paths.is_empty() {
            return None;
        }
        self.paths.get(index % self.paths.len())
    }

    /// Where a monster following this route is placed at spawn.
    pub fn spawn_point(&self) -> Option<GridPos> {
        self.paths.first().map(PatrolLeg::start)
    }
}

/// Decode a patrol resource. Routes without legs are rejected since they have
/// no spawn point.
pub fn parse_routes(bytes: &[u8]) -> Result<Vec<PatrolRoute>, GridError> {
    let routes: Vec<PatrolRoute> =
        serde_json::from_slice(bytes).map_err(|e| GridError::PatrolDecode {
            details: e.to_string(),
        })?;
    if let Some(empty) = routes.iter().find(|r| r.paths.is_empty()) {
        return Err(GridError::EmptyPatrolRoute { id: empty.id });
    }
    Ok(routes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"id": 7, "paths": [
            {"startX": 3, "startY": 4, "endX": 5, "endY": 4,
             "cells": [{"x": 3, "y": 4}, {"x": 4, "y": 4}, {"x": 5, "y": 4}]},
            {"startX": 5, "startY": 4, "endX": 5, "endY": 6,
             "cells": [{"x": 5, "y": 4}, {"x": 5, "y": 5}, {"x": 5, "y": 6}]}
        ]}
    ]"#;

    #[test]
    fn parses_camel_case_routes() {
        let routes = parse_routes(SAMPLE.as_bytes()).unwrap();
        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.id, 7);
        assert_eq!(route.spawn_point(), Some(GridPos::new(3, 4)));
        assert_eq!(route.paths[1].end(), GridPos::new(5, 6));
        assert_eq!(route.paths[0].cells.len(), 3);
    }

    #[test]
    fn legs_wrap_around() {
        let routes = parse_routes(SAMPLE.as_bytes()).unwrap();
        assert_eq!(routes[0].leg(2), routes[0].leg(0));
        assert_eq!(routes[0].leg(3).map(PatrolLeg::start), Some(GridPos::new(5, 4)));
    }

    #[test]
    fn rejects_malformed_and_empty_routes() {
        assert!(matches!(
            parse_routes(b"{not json"),
            Err(GridError::PatrolDecode { .. })
        ));
        assert!(matches!(
            parse_routes(br#"[{"id": 2, "paths": []}]"#),
            Err(GridError::EmptyPatrolRoute { id: 2 })
        ));
    }
}
