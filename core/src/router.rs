/*
 * router.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an embedded HTTP engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Regex route tables, one per method. Patterns are anchored to the whole
//! decoded path; HEAD requests dispatch through the GET table.

use regex::Regex;

use crate::message::{Method, Request, Response};

pub(crate) type Handler = Box<dyn Fn(&Request, &mut Response) + Send + Sync + 'static>;

struct Route {
    pattern: Regex,
    handler: Handler,
}

#[derive(Default)]
pub(crate) struct Router {
    get: Vec<Route>,
    post: Vec<Route>,
    put: Vec<Route>,
    patch: Vec<Route>,
    delete: Vec<Route>,
    options: Vec<Route>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Router::default()
    }

    /// Register a handler. The pattern is a regex matched against the full
    /// decoded path; capture groups become the request's captures.
    /// Patterns are trusted configuration; an invalid one panics.
    pub(crate) fn add(&mut self, method: Method, pattern: &str, handler: Handler) {
        let anchored = format!("^(?:{})$", pattern);
        let route = Route {
            pattern: Regex::new(&anchored).expect("Failed to compile path regex"),
            handler,
        };
        self.table_mut(method).push(route);
    }

    /// Run the first route whose pattern matches the request path. Returns
    /// false when no route matches.
    pub(crate) fn dispatch(&self, req: &mut Request, res: &mut Response) -> bool {
        for route in self.table(req.method) {
            if let Some(caps) = route.pattern.captures(&req.path) {
                let bound: Vec<String> = caps
                    .iter()
                    .skip(1)
                    .map(|group| group.map_or(String::new(), |m| m.as_str().to_string()))
                    .collect();
                req.captures = bound;
                (route.handler)(req, res);
                return true;
            }
        }
        false
    }

    fn table(&self, method: Method) -> &[Route] {
        match method {
            Method::Get | Method::Head => &self.get,
            Method::Post => &self.post,
            Method::Put => &self.put,
            Method::Patch => &self.patch,
            Method::Delete => &self.delete,
            Method::Options => &self.options,
        }
    }

    fn table_mut(&mut self, method: Method) -> &mut Vec<Route> {
        match method {
            Method::Get | Method::Head => &mut self.get,
            Method::Post => &mut self.post,
            Method::Put => &mut self.put,
            Method::Patch => &mut self.patch,
            Method::Delete => &mut self.delete,
            Method::Options => &mut self.options,
        }
    }
}
