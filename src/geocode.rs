use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::error::ApiError;
use crate::models::GeoPoint;

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("no coordinates found for this address")]
    NoMatch,
    #[error("geocoder request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geocoder returned an unreadable coordinate: {0}")]
    BadCoordinate(String),
}

impl GeocodeError {
    /// Unresolvable input is the client's fault; an unreachable geocoder is ours.
    pub fn into_api_error(self, client_message: &str) -> ApiError {
        match self {
            GeocodeError::NoMatch | GeocodeError::BadCoordinate(_) => {
                ApiError::validation(client_message)
            }
            GeocodeError::Request(e) => ApiError::internal(format!("geocoder unavailable: {}", e)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

/// Free-text address lookup against a Nominatim-compatible search endpoint.
#[derive(Clone)]
pub struct Geocoder {
    client: reqwest::Client,
    url: String,
    user_agent: String,
}

impl Geocoder {
    pub fn new(client: reqwest::Client, url: String, user_agent: String) -> Self {
        Geocoder {
            client,
            url,
            user_agent,
        }
    }

    pub async fn lookup(&self, address: &str) -> Result<GeoPoint, GeocodeError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(GeocodeError::NoMatch);
        }

        let places: Vec<Place> = self
            .client
            .get(&self.url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Geocoder returned {} place(s) for {:?}", places.len(), address);

        first_point(places).map_err(|e| {
            warn!("Geocoding {:?} failed: {}", address, e);
            e
        })
    }
}

fn first_point(places: Vec<Place>) -> Result<GeoPoint, GeocodeError> {
    let place = places.into_iter().next().ok_or(GeocodeError::NoMatch)?;
    let lat: f64 = place
        .lat
        .parse()
        .map_err(|_| GeocodeError::BadCoordinate(place.lat.clone()))?;
    let lon: f64 = place
        .lon
        .parse()
        .map_err(|_| GeocodeError::BadCoordinate(place.lon.clone()))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(GeocodeError::BadCoordinate(format!("{},{}", lat, lon)));
    }
    Ok(GeoPoint::new(lon, lat))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn places(json: &str) -> Vec<Place> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn first_result_becomes_lon_lat_point() {
        let p = first_point(places(
            r#"[{"lat":"36.8065","lon":"10.1815","display_name":"Tunis"},{"lat":"0","lon":"0"}]"#,
        ))
        .unwrap();
        assert_eq!(p.coordinates, [10.1815, 36.8065]);
    }

    #[test]
    fn empty_result_is_no_match() {
        assert!(matches!(first_point(places("[]")), Err(GeocodeError::NoMatch)));
    }

    #[test]
    fn unparsable_coordinate_is_rejected() {
        assert!(matches!(
            first_point(places(r#"[{"lat":"north","lon":"10"}]"#)),
            Err(GeocodeError::BadCoordinate(_))
        ));
        assert!(matches!(
            first_point(places(r#"[{"lat":"95","lon":"10"}]"#)),
            Err(GeocodeError::BadCoordinate(_))
        ));
    }

    #[test]
    fn no_match_is_a_client_error() {
        use actix_web::ResponseError;
        let err = GeocodeError::NoMatch.into_api_error("Invalid address provided");
        assert_eq!(err.status_code(), actix_web::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Invalid address provided");
    }

    #[actix_web::test]
    async fn blank_address_short_circuits() {
        let geocoder = Geocoder::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/search".into(),
            "test".into(),
        );
        assert!(matches!(geocoder.lookup("   ").await, Err(GeocodeError::NoMatch)));
    }
}
