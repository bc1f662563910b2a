use rusqlite::params;

use super::Store;
use crate::error::StoreError;
use crate::models::Service;

impl Store {
    /// Replaces a node's whole service list in one transaction
    pub fn replace_services(&self, node: &str, services: &[Service]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM services WHERE node = ?1", [node])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO services (node, name, protocol, link, ip) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for svc in services {
                stmt.execute(params![
                    node,
                    svc.name,
                    svc.protocol,
                    svc.link,
                    svc.ip.as_deref().unwrap_or(""),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn services_for(&self, node: &str) -> Result<Vec<Service>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT node, name, protocol, link, ip FROM services WHERE node = ?1 ORDER BY name",
        )?;
        let services = stmt
            .query_map([node], |r| {
                let ip: String = r.get(4)?;
                Ok(Service {
                    node: r.get(0)?,
                    name: r.get(1)?,
                    protocol: r.get(2)?,
                    link: r.get(3)?,
                    ip: Some(ip).filter(|s| !s.is_empty()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(services)
    }
}
