use crate::errors::AppResult;
use crate::geofence::distance_m;
use crate::models::{CreateLocationPayload, GeoPoint, PlaceSearchResult, PlannerSettings};

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceSearchRequest {
    pub query: String,
    pub center: GeoPoint,
    pub radius_m: u32,
    pub max_results: u32,
}

impl PlaceSearchRequest {
    /// Free-text search biased to a circle around `center`.
    pub fn text(query: &str, center: GeoPoint, settings: &PlannerSettings) -> Self {
        Self {
            query: query.trim().to_string(),
            center,
            radius_m: settings.place_search_radius_m,
            max_results: settings.place_search_max_results,
        }
    }

    /// Search by place category ("cafe", "pharmacy") over a tighter circle.
    pub fn nearby(place_type: &str, center: GeoPoint, settings: &PlannerSettings) -> Self {
        Self {
            query: place_type.trim().to_string(),
            center,
            radius_m: settings.nearby_search_radius_m,
            max_results: settings.nearby_search_max_results,
        }
    }
}

/// External place lookup used while creating a location.
pub trait PlaceSearch: Send + Sync {
    fn search_places(&self, request: &PlaceSearchRequest) -> AppResult<Vec<PlaceSearchResult>>;
}

/// Offline lookup over a fixed set of places, matched on name, address or
/// type and limited to the request circle.
#[derive(Debug, Clone, Default)]
pub struct CatalogPlaceSearch {
    places: Vec<PlaceSearchResult>,
}

impl CatalogPlaceSearch {
    pub fn new(places: Vec<PlaceSearchResult>) -> Self {
        Self { places }
    }
}

impl PlaceSearch for CatalogPlaceSearch {
    fn search_places(&self, request: &PlaceSearchRequest) -> AppResult<Vec<PlaceSearchResult>> {
        let needle = request.query.to_lowercase();
        let mut hits: Vec<(f64, &PlaceSearchResult)> = self
            .places
            .iter()
            .filter(|place| {
                needle.is_empty()
                    || place.name.to_lowercase().contains(&needle)
                    || place.address.to_lowercase().contains(&needle)
                    || place.types.iter().any(|kind| kind.to_lowercase() == needle)
            })
            .map(|place| {
                let distance = distance_m(request.center, GeoPoint::new(place.latitude, place.longitude));
                (distance, place)
            })
            .filter(|(distance, _)| *distance <= f64::from(request.radius_m))
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(hits
            .into_iter()
            .take(request.max_results as usize)
            .map(|(_, place)| place.clone())
            .collect())
    }
}

/// Prefills the add-location form from a picked search result.
pub fn location_draft_from_place(place: &PlaceSearchResult, radius: u32) -> CreateLocationPayload {
    CreateLocationPayload {
        name: place.name.clone(),
        address: place.address.clone(),
        point: Some(GeoPoint::new(place.latitude, place.longitude)),
        radius: Some(radius),
    }
}
