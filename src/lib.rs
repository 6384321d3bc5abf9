/*
 * This file is part of multisim.
 *
 * Copyright (C) 2025 multisim contributors
 *
 * multisim is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * multisim is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with multisim. If not, see <https://www.gnu.org/licenses/>.
 */

//! multisim - multi-SIM discovery and reconciliation
//!
//! Command-line front end: local passes and store queries over `ms-core`, and
//! a socket client for the `multisimd` daemon.

pub mod cli;
pub mod client;
pub mod logger;
