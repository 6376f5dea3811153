// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! API-key hashing, consumed by the API-key auth middleware. The core only
//! exposes the pure hash function so the `apiKeyHash` column contract is
//! testable without implementing the middleware itself.

/// Hash an API key the same way it is stored in `projects.apiKeyHash`.
pub fn hash_api_key(api_key: &str) -> String {
    blake3::hash(api_key.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_distinct() {
        let a = hash_api_key("sk-live-abc");
        let b = hash_api_key("sk-live-abc");
        let c = hash_api_key("sk-live-xyz");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
